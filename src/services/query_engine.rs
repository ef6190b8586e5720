//! 内容查询引擎
//!
//! 统一入口：过滤 → 键空间映射 → 分页驱动（分页模式单次、随机模式全量）→
//! 随机模式下洗牌截取 → 批量水合 → 规范化记录。
//!
//! 读操作全有或全无；批量删除/导入按分块报告部分成功。

use crate::config::EngineConfig;
use crate::models::{
    BatchWriteReport, ChunkFailure, ItemRejection, Question, QuestionDraft, QuestionFilters,
    QueryMode, QuestionKey, QuestionPage, QuestionRecord, QuestionStats, QuestionType,
};
use crate::services::error::{QueryError, QueryResult};
use crate::services::hydration::{normalize, Hydrator};
use crate::services::keyspace::{
    self, build_query_spec, question_to_item, store_key, ATTR_CREATED_AT, ATTR_DIFFICULTY,
    ATTR_TYPE,
};
use crate::services::pagination::Paginator;
use crate::services::sampling;
use crate::services::store::{ContentStore, Projection, StoreKey, StoredItem, WriteRequest};
use crate::services::token::{decode_token, encode_token};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct QueryEngine {
    store: Arc<dyn ContentStore>,
    config: EngineConfig,
    rng: Mutex<StdRng>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn ContentStore>, config: EngineConfig) -> Self {
        let config = config.normalized();
        let rng = match config.sampling_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            store,
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn paginator(&self) -> Paginator<'_> {
        Paginator::new(
            self.store.as_ref(),
            self.config.scan_page_size,
            self.config.max_scan_pages,
        )
    }

    fn hydrator(&self) -> Hydrator<'_> {
        Hydrator::new(
            self.store.as_ref(),
            self.config.read_batch_size,
            self.config.hydrate_concurrency,
            self.config.retry.backoff(),
        )
    }

    // ==================== 读取 ====================

    /// 按过滤条件查询题目（分页或随机）
    pub async fn query_questions(
        &self,
        filters: &QuestionFilters,
        mode: QueryMode,
        cancel: &CancellationToken,
    ) -> QueryResult<QuestionPage> {
        let spec = build_query_spec(filters);

        match mode {
            QueryMode::Paged {
                limit,
                continuation_token,
            } => {
                let limit = self.config.page_size(limit);
                let start = decode_token(continuation_token.as_deref());
                let page = self
                    .paginator()
                    .fetch_page(&spec, &Projection::All, limit, start)
                    .await?;

                let records = page
                    .items
                    .iter()
                    .map(normalize)
                    .collect::<QueryResult<Vec<_>>>()?;
                let continuation_token = page
                    .last_evaluated_key
                    .as_ref()
                    .map(encode_token)
                    .transpose()?;

                log::info!(
                    "paged query [{}] returned {} record(s), more={}",
                    spec.filter,
                    records.len(),
                    continuation_token.is_some()
                );
                Ok(QuestionPage {
                    records,
                    continuation_token,
                })
            }
            QueryMode::Random { count } => {
                let candidates = self.candidate_keys(filters, cancel).await?;
                let candidate_count = candidates.len();
                let selected = {
                    let mut rng = self.rng.lock().map_err(|e| {
                        QueryError::StoreUnavailable(format!("sampler lock poisoned: {}", e))
                    })?;
                    sampling::sample(candidates, count, &mut *rng)
                };
                let records = self.hydrator().hydrate(&selected).await?;

                log::info!(
                    "random query [{}] sampled {} of {} candidate(s)",
                    spec.filter,
                    records.len(),
                    candidate_count
                );
                Ok(QuestionPage {
                    records,
                    continuation_token: None,
                })
            }
        }
    }

    /// 标题子串搜索（全量扫描，代价高）
    pub async fn search_questions(
        &self,
        search_term: &str,
        cancel: &CancellationToken,
    ) -> QueryResult<Vec<QuestionRecord>> {
        if search_term.trim().is_empty() {
            return Err(QueryError::InvalidFilter(
                "search term must not be empty".to_string(),
            ));
        }
        let filters = QuestionFilters {
            search_term: Some(search_term.to_string()),
            ..Default::default()
        };
        let keys = self.candidate_keys(&filters, cancel).await?;
        let records = self.hydrator().hydrate(&keys).await?;
        log::info!("search '{}' matched {} record(s)", search_term, records.len());
        Ok(records)
    }

    /// 统计数量（仅投影题型与难度，不水合）
    pub async fn get_stats(
        &self,
        filters: &QuestionFilters,
        cancel: &CancellationToken,
    ) -> QueryResult<QuestionStats> {
        let spec = build_query_spec(filters);
        let projection = Projection::Attributes(vec![
            ATTR_TYPE.to_string(),
            ATTR_DIFFICULTY.to_string(),
        ]);
        let items = self.paginator().collect_all(&spec, &projection, cancel).await?;

        let mut stats = QuestionStats {
            total_count: items.len(),
            ..Default::default()
        };
        for item in &items {
            match item.attr_i64(ATTR_DIFFICULTY).and_then(|l| u8::try_from(l).ok()) {
                Some(level) => *stats.per_difficulty_counts.entry(level).or_insert(0) += 1,
                None => log::warn!("{} has no difficulty level", item.key()),
            }
            match item
                .attr_str(ATTR_TYPE)
                .and_then(|t| keyspace::strip_key_prefix(t).parse::<QuestionType>().ok())
            {
                Some(question_type) => *stats.per_type_counts.entry(question_type).or_insert(0) += 1,
                None => log::warn!("{} has no recognizable type", item.key()),
            }
        }
        Ok(stats)
    }

    pub async fn get_question(&self, key: &QuestionKey) -> QueryResult<Option<QuestionRecord>> {
        self.store
            .get_item(&store_key(key))
            .await?
            .as_ref()
            .map(normalize)
            .transpose()
    }

    // ==================== 写入 ====================

    /// 新建题目，分配题目 ID 与时间戳
    pub async fn create_question(&self, draft: QuestionDraft) -> QueryResult<QuestionRecord> {
        let now = Utc::now();
        let question = Question {
            subject_id: draft.subject_id,
            question_id: Uuid::new_v4().simple().to_string(),
            title: draft.title,
            difficulty: draft.difficulty,
            payload: draft.payload,
            created_at: now,
            updated_at: now,
        };
        self.put_question(&question).await
    }

    /// 校验后写入（覆盖同键记录）；已有记录的创建时间保持不变
    pub async fn put_question(&self, question: &Question) -> QueryResult<QuestionRecord> {
        question.validate()?;

        let mut question = question.clone();
        if let Some(existing) = self.get_question(&question.key()).await? {
            question.created_at = existing.created_at;
        }

        let item = question_to_item(&question)?;
        let record = normalize(&item)?;
        self.store.put_item(item).await?;
        log::info!(
            "stored question {}/{}",
            question.subject_id,
            question.question_id
        );
        Ok(record)
    }

    pub async fn delete_question(&self, key: &QuestionKey) -> QueryResult<bool> {
        self.store.delete_item(&store_key(key)).await
    }

    /// 批量删除：按科目前缀全量扫描后，每次至多 25 条分块删除
    ///
    /// 空字符串前缀表示全部科目。任一分块失败时返回 `PartialBatchFailure`，
    /// 报告中列出成功与失败的分块。
    pub async fn bulk_delete(
        &self,
        subject_prefixes: &[String],
        cancel: &CancellationToken,
    ) -> QueryResult<BatchWriteReport> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for prefix in subject_prefixes {
            let subject = prefix.trim();
            let filters = QuestionFilters {
                subject_id: (!subject.is_empty()).then(|| subject.to_string()),
                ..Default::default()
            };
            for key in self.candidate_keys(&filters, cancel).await? {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }

        let requests = keys.into_iter().map(WriteRequest::Delete).collect();
        let report = self.write_chunks(requests, Vec::new(), cancel).await?;
        log::info!(
            "bulk delete removed {} item(s) in {} chunk(s), {} failed",
            report.affected_count,
            report.chunk_count,
            report.failed_chunks.len()
        );
        into_batch_result(report)
    }

    /// 批量导入：逐条校验，合格记录每次至多 25 条分块写入
    ///
    /// 校验失败的记录在报告中列出，不影响其余记录。与 `put_question` 一致，
    /// 覆盖已有记录时保留其创建时间。
    pub async fn bulk_import(
        &self,
        questions: Vec<Question>,
        cancel: &CancellationToken,
    ) -> QueryResult<BatchWriteReport> {
        let mut rejected = Vec::new();
        let mut accepted = Vec::with_capacity(questions.len());
        for (index, question) in questions.into_iter().enumerate() {
            match question.validate() {
                Ok(()) => accepted.push(question),
                Err(e) => rejected.push(ItemRejection {
                    index,
                    reason: e.to_string(),
                }),
            }
        }

        let keys: Vec<StoreKey> = accepted.iter().map(|q| store_key(&q.key())).collect();
        let created: HashMap<StoreKey, DateTime<Utc>> = self
            .hydrator()
            .fetch_existing(&keys)
            .await?
            .iter()
            .filter_map(|item| {
                let raw = item.attr_str(ATTR_CREATED_AT)?;
                let at = DateTime::parse_from_rfc3339(raw).ok()?;
                Some((item.key(), at.with_timezone(&Utc)))
            })
            .collect();

        let mut requests = Vec::with_capacity(accepted.len());
        for (mut question, key) in accepted.into_iter().zip(&keys) {
            if let Some(at) = created.get(key) {
                question.created_at = *at;
            }
            requests.push(WriteRequest::Put(question_to_item(&question)?));
        }

        let report = self.write_chunks(requests, rejected, cancel).await?;
        log::info!(
            "bulk import wrote {} item(s), rejected {}, {} chunk(s) failed",
            report.affected_count,
            report.rejected_items.len(),
            report.failed_chunks.len()
        );
        into_batch_result(report)
    }

    // ==================== 辅助方法 ====================

    /// 全量枚举匹配过滤条件的键（仅投影键字段）
    async fn candidate_keys(
        &self,
        filters: &QuestionFilters,
        cancel: &CancellationToken,
    ) -> QueryResult<Vec<StoreKey>> {
        let spec = build_query_spec(filters);
        let items = self
            .paginator()
            .collect_all(&spec, &Projection::KeysOnly, cancel)
            .await?;
        Ok(items.iter().map(StoredItem::key).collect())
    }

    async fn write_chunks(
        &self,
        requests: Vec<WriteRequest>,
        rejected_items: Vec<ItemRejection>,
        cancel: &CancellationToken,
    ) -> QueryResult<BatchWriteReport> {
        let chunks: Vec<Vec<WriteRequest>> = requests
            .chunks(self.config.write_batch_size)
            .map(<[WriteRequest]>::to_vec)
            .collect();

        let mut report = BatchWriteReport {
            chunk_count: chunks.len(),
            rejected_items,
            ..Default::default()
        };

        let store = self.store.as_ref();
        let mut outcomes = stream::iter(chunks.into_iter().enumerate())
            .map(|(idx, chunk)| async move {
                let keys: Vec<QuestionKey> = chunk
                    .iter()
                    .map(|r| match r {
                        WriteRequest::Put(item) => keyspace::question_key(&item.key()),
                        WriteRequest::Delete(key) => keyspace::question_key(key),
                    })
                    .collect();
                if cancel.is_cancelled() {
                    return (idx, keys, Err(QueryError::Cancelled));
                }
                let result = store.batch_write(chunk).await;
                (idx, keys, result)
            })
            .buffer_unordered(self.config.write_concurrency);

        while let Some((idx, keys, result)) = outcomes.next().await {
            match result {
                Ok(()) => {
                    report.affected_count += keys.len();
                    report.succeeded_chunks.push(idx);
                }
                Err(e) => {
                    log::warn!("batch chunk {} ({} item(s)) failed: {}", idx, keys.len(), e);
                    report.failed_chunks.push(ChunkFailure {
                        chunk_index: idx,
                        keys,
                        error: e.to_string(),
                    });
                }
            }
        }

        report.succeeded_chunks.sort_unstable();
        report.failed_chunks.sort_by_key(|f| f.chunk_index);
        Ok(report)
    }
}

fn into_batch_result(report: BatchWriteReport) -> QueryResult<BatchWriteReport> {
    if report.is_complete() {
        Ok(report)
    } else {
        Err(QueryError::PartialBatchFailure(report))
    }
}
