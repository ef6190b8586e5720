// 测试辅助：题目样本构造与可注入故障、可计数的存储包装

use crate::models::{Blank, Difficulty, Question, QuestionOption, QuestionPayload};
use crate::services::error::{QueryError, QueryResult};
use crate::services::keyspace::question_to_item;
use crate::services::store::{
    BatchGetOutput, ContentStore, ContinuationToken, Page, Projection, QuerySpec, StoreKey,
    StoredItem, WriteRequest, MAX_BATCH_WRITE,
};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn option(text: &str, weight: f64, is_correct: bool) -> QuestionOption {
    QuestionOption {
        text: text.to_string(),
        weight,
        is_correct,
    }
}

/// 第 `idx` 道样本题：题型按 MCQ/MSQ/FIB 轮换，难度每三题递增一次
pub fn make_question(subject_id: &str, idx: usize) -> Question {
    let payload = match idx % 3 {
        0 => QuestionPayload::Mcq {
            options: vec![option("A", 100.0, true), option("B", 0.0, false)],
        },
        1 => QuestionPayload::Msq {
            options: vec![
                option("A", 60.0, true),
                option("B", 40.0, true),
                option("C", 0.0, false),
            ],
        },
        _ => QuestionPayload::Fib {
            blanks: vec![Blank {
                answers: vec![format!("answer {}", idx)],
                case_sensitive: false,
            }],
        },
    };
    let difficulty = match (idx / 3) % 3 {
        0 => Difficulty::Easy,
        1 => Difficulty::Medium,
        _ => Difficulty::Hard,
    };
    let created_at = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap() + Duration::seconds(idx as i64);

    Question {
        subject_id: subject_id.to_string(),
        question_id: format!("q{:04}", idx),
        title: format!("{} Question {:03}", subject_id, idx),
        difficulty,
        payload,
        created_at,
        updated_at: created_at,
    }
}

/// 写入 `count` 道样本题并返回
pub async fn seed_questions(store: &dyn ContentStore, subject_id: &str, count: usize) -> Vec<Question> {
    let questions: Vec<Question> = (0..count).map(|i| make_question(subject_id, i)).collect();
    let requests: Vec<WriteRequest> = questions
        .iter()
        .map(|q| WriteRequest::Put(question_to_item(q).unwrap()))
        .collect();
    for chunk in requests.chunks(MAX_BATCH_WRITE) {
        store.batch_write(chunk.to_vec()).await.unwrap();
    }
    questions
}

#[derive(Debug, Clone)]
pub enum FaultMode {
    None,
    /// 前 n 次查询成功，之后全部失败
    FailQueryAfter(usize),
    /// 前 n 次批量读取只处理一半的键
    ThrottleGets(usize),
    /// 包含该键的批量写入失败
    FailWritesContaining(StoreKey),
}

/// 包装真实存储，记录调用次数并按模式注入故障
pub struct FaultyStore<S> {
    inner: S,
    mode: FaultMode,
    query_calls: AtomicUsize,
    get_calls: AtomicUsize,
    get_sizes: Mutex<Vec<usize>>,
    write_sizes: Mutex<Vec<usize>>,
}

impl<S: ContentStore> FaultyStore<S> {
    pub fn new(inner: S, mode: FaultMode) -> Self {
        Self {
            inner,
            mode,
            query_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            get_sizes: Mutex::new(Vec::new()),
            write_sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn get_sizes(&self) -> Vec<usize> {
        self.get_sizes.lock().unwrap().clone()
    }

    /// 每次批量写入的条目数（按调用顺序）
    pub fn write_sizes(&self) -> Vec<usize> {
        self.write_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl<S: ContentStore> ContentStore for FaultyStore<S> {
    async fn query(
        &self,
        spec: &QuerySpec,
        projection: &Projection,
        limit: usize,
        exclusive_start_key: Option<&ContinuationToken>,
    ) -> QueryResult<Page> {
        let call = self.query_calls.fetch_add(1, Ordering::SeqCst);
        if let FaultMode::FailQueryAfter(n) = self.mode {
            if call >= n {
                return Err(QueryError::StoreUnavailable("injected query failure".into()));
            }
        }
        self.inner
            .query(spec, projection, limit, exclusive_start_key)
            .await
    }

    async fn batch_get(&self, keys: &[StoreKey]) -> QueryResult<BatchGetOutput> {
        let call = self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.get_sizes.lock().unwrap().push(keys.len());
        if let FaultMode::ThrottleGets(n) = self.mode {
            if call < n && keys.len() > 1 {
                let (served, deferred) = keys.split_at(keys.len() / 2);
                let mut out = self.inner.batch_get(served).await?;
                out.unprocessed_keys = deferred.to_vec();
                return Ok(out);
            }
        }
        self.inner.batch_get(keys).await
    }

    async fn batch_write(&self, requests: Vec<WriteRequest>) -> QueryResult<()> {
        self.write_sizes.lock().unwrap().push(requests.len());
        if let FaultMode::FailWritesContaining(key) = &self.mode {
            let hit = requests.iter().any(|r| match r {
                WriteRequest::Put(item) => &item.key() == key,
                WriteRequest::Delete(k) => k == key,
            });
            if hit {
                return Err(QueryError::StoreUnavailable("injected write failure".into()));
            }
        }
        self.inner.batch_write(requests).await
    }

    async fn get_item(&self, key: &StoreKey) -> QueryResult<Option<StoredItem>> {
        self.inner.get_item(key).await
    }

    async fn put_item(&self, item: StoredItem) -> QueryResult<()> {
        self.inner.put_item(item).await
    }

    async fn delete_item(&self, key: &StoreKey) -> QueryResult<bool> {
        self.inner.delete_item(key).await
    }
}
