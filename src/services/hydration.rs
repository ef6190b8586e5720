//! 批量水合与规范化
//!
//! 按存储批量读取上限分块拉取完整记录，分块之间可并发；存储报告的未处理键
//! 按指数退避重新请求。任一分块失败即整体失败，调用方要么拿到完整结果，
//! 要么拿到明确的错误。

use crate::models::{Difficulty, QuestionPayload, QuestionRecord, QuestionType};
use crate::services::error::{QueryError, QueryResult};
use crate::services::keyspace::{
    strip_key_prefix, ATTR_CREATED_AT, ATTR_DIFFICULTY, ATTR_PAYLOAD, ATTR_TITLE, ATTR_TYPE,
    ATTR_UPDATED_AT,
};
use crate::services::store::{ContentStore, StoreKey, StoredItem, MAX_BATCH_GET};
use backon::{BackoffBuilder, ExponentialBuilder};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;

pub struct Hydrator<'a> {
    store: &'a dyn ContentStore,
    batch_size: usize,
    concurrency: usize,
    backoff: ExponentialBuilder,
}

impl<'a> Hydrator<'a> {
    pub fn new(
        store: &'a dyn ContentStore,
        batch_size: usize,
        concurrency: usize,
        backoff: ExponentialBuilder,
    ) -> Self {
        Self {
            store,
            batch_size: batch_size.clamp(1, MAX_BATCH_GET),
            concurrency: concurrency.max(1),
            backoff,
        }
    }

    /// 水合给定键集合，结果顺序与输入一致
    ///
    /// 任一键在存储中缺失（例如扫描与水合之间被删除）则整体失败。
    pub async fn hydrate(&self, keys: &[StoreKey]) -> QueryResult<Vec<QuestionRecord>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let by_key: HashMap<StoreKey, StoredItem> = self
            .fetch_existing(keys)
            .await?
            .into_iter()
            .map(|item| (item.key(), item))
            .collect();

        let missing: Vec<&StoreKey> = keys.iter().filter(|k| !by_key.contains_key(*k)).collect();
        if let Some(first) = missing.first() {
            log::warn!(
                "{} of {} key(s) missing at hydration, first {}",
                missing.len(),
                keys.len(),
                first
            );
            return Err(QueryError::IncompleteHydration {
                missing: missing.len(),
                requested: keys.len(),
                first: first.to_string(),
            });
        }

        let records = keys
            .iter()
            .filter_map(|key| by_key.get(key))
            .map(normalize)
            .collect::<QueryResult<Vec<_>>>()?;

        log::debug!("hydrated {} key(s)", records.len());
        Ok(records)
    }

    /// 分块批量读取原始记录；不存在的键直接缺席，不报错
    pub async fn fetch_existing(&self, keys: &[StoreKey]) -> QueryResult<Vec<StoredItem>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let chunks: Vec<&[StoreKey]> = keys.chunks(self.batch_size).collect();
        let chunk_count = chunks.len();

        let fetched: Vec<Vec<StoredItem>> = stream::iter(chunks.into_iter().enumerate())
            .map(|(idx, chunk)| self.fetch_chunk(idx, chunk))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let items: Vec<StoredItem> = fetched.into_iter().flatten().collect();
        log::debug!(
            "fetched {} of {} key(s) in {} chunk(s)",
            items.len(),
            keys.len(),
            chunk_count
        );
        Ok(items)
    }

    async fn fetch_chunk(&self, idx: usize, chunk: &[StoreKey]) -> QueryResult<Vec<StoredItem>> {
        let mut pending = chunk.to_vec();
        let mut items = Vec::with_capacity(chunk.len());
        let mut delays = self.backoff.clone().build();

        loop {
            let output = self.store.batch_get(&pending).await?;
            items.extend(output.items);
            if output.unprocessed_keys.is_empty() {
                return Ok(items);
            }

            pending = output.unprocessed_keys;
            match delays.next() {
                Some(delay) => {
                    log::debug!(
                        "chunk {}: {} unprocessed key(s), retrying in {:?}",
                        idx,
                        pending.len(),
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(QueryError::StoreUnavailable(format!(
                        "chunk {}: {} key(s) still unprocessed after retries",
                        idx,
                        pending.len()
                    )));
                }
            }
        }
    }
}

/// 将宽表记录规范化为对外的题目记录
pub fn normalize(item: &StoredItem) -> QueryResult<QuestionRecord> {
    let malformed = |reason: String| QueryError::MalformedItem {
        key: item.key().to_string(),
        reason,
    };
    let required_str = |name: &str| {
        item.attr_str(name)
            .ok_or_else(|| malformed(format!("missing string attribute '{}'", name)))
    };

    let question_type: QuestionType = strip_key_prefix(required_str(ATTR_TYPE)?)
        .parse()
        .map_err(|e: QueryError| malformed(e.to_string()))?;

    let level = item
        .attr_i64(ATTR_DIFFICULTY)
        .ok_or_else(|| malformed(format!("missing numeric attribute '{}'", ATTR_DIFFICULTY)))?;
    let difficulty = Difficulty::try_from(level).map_err(|e| malformed(e.to_string()))?;

    let payload: QuestionPayload = serde_json::from_value(
        item.attributes
            .get(ATTR_PAYLOAD)
            .cloned()
            .ok_or_else(|| malformed(format!("missing attribute '{}'", ATTR_PAYLOAD)))?,
    )?;
    if payload.question_type() != question_type {
        return Err(malformed(format!(
            "type attribute {} disagrees with payload kind {}",
            question_type,
            payload.question_type()
        )));
    }

    let timestamp = |name: &str| -> QueryResult<DateTime<Utc>> {
        let raw = required_str(name)?;
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| malformed(format!("attribute '{}' is not RFC 3339: {}", name, e)))
    };

    Ok(QuestionRecord {
        subject_id: strip_key_prefix(&item.pk).to_string(),
        question_id: strip_key_prefix(&item.sk).to_string(),
        title: required_str(ATTR_TITLE)?.to_string(),
        question_type,
        difficulty,
        payload,
        created_at: timestamp(ATTR_CREATED_AT)?,
        updated_at: timestamp(ATTR_UPDATED_AT)?,
    })
}
