// 题目命令模块
// 提供供 IPC 调用方使用的查询、统计与批量操作命令

use crate::models::{
    BatchWriteReport, Difficulty, Question, QuestionDraft, QuestionFilters, QuestionKey,
    QuestionPayload, QuestionRecord, QuestionStats, QueryMode,
};
use crate::services::{QueryEngine, QueryError, QueryResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 引擎应用状态
pub struct EngineState {
    pub engine: Arc<QueryEngine>,
    pub request_timeout: Duration,
    /// 进程级关闭信号，每个请求派生子令牌
    pub shutdown: CancellationToken,
}

impl EngineState {
    pub fn new(engine: Arc<QueryEngine>) -> Self {
        let request_timeout = engine.config().request_timeout();
        Self {
            engine,
            request_timeout,
            shutdown: CancellationToken::new(),
        }
    }
}

/// 命令错误（返回给调用方）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CommandError {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params".to_string(),
            message: message.into(),
            details: None,
        }
    }
}

impl From<QueryError> for CommandError {
    fn from(e: QueryError) -> Self {
        let details = match &e {
            QueryError::PartialBatchFailure(report) => serde_json::to_value(report).ok(),
            _ => None,
        };
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
            details,
        }
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

// ==================== 传输对象 ====================

/// 查询参数（调用方传入，原始字符串形式）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryQuestionsDto {
    pub subject_id: Option<String>,
    pub question_type: Option<String>,
    pub difficulty_level: Option<i64>,
    pub search_term: Option<String>,
    /// "paged"（默认）或 "random"
    pub mode: Option<String>,
    pub limit: Option<usize>,
    pub count: Option<usize>,
    pub continuation_token: Option<String>,
}

impl QueryQuestionsDto {
    fn filters(&self) -> QueryResult<QuestionFilters> {
        QuestionFilters::from_raw(
            self.subject_id.as_deref(),
            self.question_type.as_deref(),
            self.difficulty_level,
            self.search_term.as_deref(),
        )
    }

    /// 随机模式未给出数量时取默认页大小
    fn mode(&self, default_count: usize) -> QueryResult<QueryMode> {
        match self.mode.as_deref().map(str::trim) {
            None | Some("") | Some("paged") => Ok(QueryMode::Paged {
                limit: self.limit,
                continuation_token: self.continuation_token.clone(),
            }),
            Some("random") => Ok(QueryMode::Random {
                count: self
                    .count
                    .or(self.limit)
                    .filter(|n| *n > 0)
                    .unwrap_or(default_count),
            }),
            Some(other) => Err(QueryError::InvalidFilter(format!(
                "unknown query mode '{}'",
                other
            ))),
        }
    }
}

/// 题目传输对象（返回给调用方）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDto {
    pub subject_id: String,
    pub question_id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub question_type: String,
    pub difficulty_level: u8,
    pub payload: QuestionPayload,
    pub created_at: String,
    pub updated_at: String,
}

impl From<QuestionRecord> for QuestionDto {
    fn from(r: QuestionRecord) -> Self {
        Self {
            subject_id: r.subject_id,
            question_id: r.question_id,
            title: r.title,
            question_type: r.question_type.to_string(),
            difficulty_level: r.difficulty.level(),
            payload: r.payload,
            created_at: r.created_at.to_rfc3339(),
            updated_at: r.updated_at.to_rfc3339(),
        }
    }
}

/// 查询结果页传输对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPageDto {
    pub questions: Vec<QuestionDto>,
    pub continuation_token: Option<String>,
}

/// 统计传输对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionStatsDto {
    pub total_count: usize,
    pub per_difficulty_counts: BTreeMap<String, usize>,
    pub per_type_counts: BTreeMap<String, usize>,
}

impl From<QuestionStats> for QuestionStatsDto {
    fn from(s: QuestionStats) -> Self {
        Self {
            total_count: s.total_count,
            per_difficulty_counts: s
                .per_difficulty_counts
                .into_iter()
                .map(|(level, n)| (level.to_string(), n))
                .collect(),
            per_type_counts: s
                .per_type_counts
                .into_iter()
                .map(|(t, n)| (t.to_string(), n))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuestionsDto {
    pub search_term: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsDto {
    pub subject_id: Option<String>,
    pub question_type: Option<String>,
    pub difficulty_level: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionKeyDto {
    pub subject_id: String,
    pub question_id: String,
}

/// 题目写入对象；未给出题目 ID 时新建
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionInputDto {
    pub subject_id: String,
    pub question_id: Option<String>,
    pub title: String,
    pub difficulty_level: Difficulty,
    pub payload: QuestionPayload,
}

impl QuestionInputDto {
    fn into_question(self) -> Question {
        let now = Utc::now();
        Question {
            subject_id: self.subject_id,
            question_id: self
                .question_id
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            title: self.title,
            difficulty: self.difficulty_level,
            payload: self.payload,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteDto {
    pub subject_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkImportDto {
    pub questions: Vec<QuestionInputDto>,
}

// ==================== 命令 ====================

/// 在请求截止时间内执行；超时或关闭时取消令牌并返回 `cancelled`
async fn with_deadline<T, F, Fut>(state: &EngineState, op: F) -> CommandResult<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = QueryResult<T>>,
{
    let cancel = state.shutdown.child_token();
    match tokio::time::timeout(state.request_timeout, op(cancel.clone())).await {
        Ok(result) => result.map_err(CommandError::from),
        Err(_) => {
            cancel.cancel();
            log::warn!("request exceeded {:?}, cancelled", state.request_timeout);
            Err(QueryError::Cancelled.into())
        }
    }
}

/// 查询题目（分页或随机）
pub async fn query_questions(
    state: &EngineState,
    params: QueryQuestionsDto,
) -> CommandResult<QuestionPageDto> {
    let filters = params.filters()?;
    let mode = params.mode(state.engine.config().page_size(None))?;
    let page = with_deadline(state, |cancel| async move {
        state.engine.query_questions(&filters, mode, &cancel).await
    })
    .await?;

    Ok(QuestionPageDto {
        questions: page.records.into_iter().map(QuestionDto::from).collect(),
        continuation_token: page.continuation_token,
    })
}

/// 按标题搜索题目
pub async fn search_questions(
    state: &EngineState,
    params: SearchQuestionsDto,
) -> CommandResult<Vec<QuestionDto>> {
    let records = with_deadline(state, |cancel| async move {
        state
            .engine
            .search_questions(&params.search_term, &cancel)
            .await
    })
    .await?;
    Ok(records.into_iter().map(QuestionDto::from).collect())
}

/// 获取统计
pub async fn get_stats(state: &EngineState, params: StatsDto) -> CommandResult<QuestionStatsDto> {
    let filters = QuestionFilters::from_raw(
        params.subject_id.as_deref(),
        params.question_type.as_deref(),
        params.difficulty_level,
        None,
    )?;
    let stats = with_deadline(state, |cancel| async move {
        state.engine.get_stats(&filters, &cancel).await
    })
    .await?;
    Ok(stats.into())
}

/// 获取单个题目
pub async fn get_question(
    state: &EngineState,
    params: QuestionKeyDto,
) -> CommandResult<Option<QuestionDto>> {
    let key = QuestionKey::new(params.subject_id, params.question_id);
    let record = with_deadline(state, |_| async move {
        state.engine.get_question(&key).await
    })
    .await?;
    Ok(record.map(QuestionDto::from))
}

/// 写入题目
pub async fn put_question(
    state: &EngineState,
    params: QuestionInputDto,
) -> CommandResult<QuestionDto> {
    let record = with_deadline(state, |_| async move {
        match params.question_id {
            Some(_) => state.engine.put_question(&params.into_question()).await,
            None => {
                state
                    .engine
                    .create_question(QuestionDraft {
                        subject_id: params.subject_id,
                        title: params.title,
                        difficulty: params.difficulty_level,
                        payload: params.payload,
                    })
                    .await
            }
        }
    })
    .await?;
    Ok(record.into())
}

/// 删除单个题目，返回是否存在
pub async fn delete_question(state: &EngineState, params: QuestionKeyDto) -> CommandResult<bool> {
    let key = QuestionKey::new(params.subject_id, params.question_id);
    with_deadline(state, |_| async move {
        state.engine.delete_question(&key).await
    })
    .await
}

/// 按科目前缀批量删除
pub async fn bulk_delete(
    state: &EngineState,
    params: BulkDeleteDto,
) -> CommandResult<BatchWriteReport> {
    if params.subject_prefixes.is_empty() {
        return Err(CommandError::bad_params("subjectPrefixes must not be empty"));
    }
    with_deadline(state, |cancel| async move {
        state
            .engine
            .bulk_delete(&params.subject_prefixes, &cancel)
            .await
    })
    .await
}

/// 批量导入题目
pub async fn bulk_import(
    state: &EngineState,
    params: BulkImportDto,
) -> CommandResult<BatchWriteReport> {
    let questions: Vec<Question> = params
        .questions
        .into_iter()
        .map(QuestionInputDto::into_question)
        .collect();
    with_deadline(state, |cancel| async move {
        state.engine.bulk_import(questions, &cancel).await
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::services::SqliteContentStore;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn state() -> EngineState {
        let store = SqliteContentStore::in_memory().unwrap();
        let config = EngineConfig {
            sampling_seed: Some(3),
            ..Default::default()
        };
        EngineState::new(Arc::new(QueryEngine::new(Arc::new(store), config)))
    }

    fn input(subject: &str, title: &str, level: u8) -> QuestionInputDto {
        serde_json::from_value(json!({
            "subjectId": subject,
            "title": title,
            "difficultyLevel": level,
            "payload": {
                "kind": "MCQ",
                "options": [
                    { "text": "yes", "weight": 100.0, "is_correct": true },
                    { "text": "no", "weight": 0.0, "is_correct": false }
                ]
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn put_then_query_round_trips_through_dtos() {
        let state = state();
        let created = put_question(&state, input("physics", "Is light a wave?", 2))
            .await
            .unwrap();
        assert_eq!(created.question_type, "MCQ");
        assert_eq!(created.difficulty_level, 2);

        let page = query_questions(
            &state,
            QueryQuestionsDto {
                subject_id: Some("physics".to_string()),
                question_type: Some("MCQ".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(page.questions, vec![created]);
        assert!(page.continuation_token.is_none());
    }

    #[tokio::test]
    async fn invalid_filter_is_reported_with_code() {
        let state = state();
        let err = query_questions(
            &state,
            QueryQuestionsDto {
                question_type: Some("ESSAY".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "invalid_filter");

        let err = get_stats(
            &state,
            StatsDto {
                difficulty_level: Some(9),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "invalid_filter");
    }

    #[tokio::test]
    async fn random_mode_without_count_uses_default_page_size() {
        let state = state();
        for i in 0..3 {
            put_question(&state, input("bio", &format!("Cell {}", i), 1))
                .await
                .unwrap();
        }

        let params = QueryQuestionsDto {
            mode: Some("random".to_string()),
            ..Default::default()
        };
        assert_eq!(
            params.mode(state.engine.config().page_size(None)).unwrap(),
            QueryMode::Random { count: 50 }
        );

        let page = query_questions(&state, params).await.unwrap();
        assert_eq!(page.questions.len(), 3);
    }

    #[tokio::test]
    async fn unknown_mode_is_rejected() {
        let state = state();
        let err = query_questions(
            &state,
            QueryQuestionsDto {
                mode: Some("shuffled".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "invalid_filter");
    }

    #[tokio::test]
    async fn stats_keys_are_stringified() {
        let state = state();
        for i in 0..4 {
            put_question(&state, input("physics", &format!("Q{}", i), 1 + (i % 2) as u8))
                .await
                .unwrap();
        }
        let stats = get_stats(&state, StatsDto::default()).await.unwrap();
        assert_eq!(stats.total_count, 4);
        assert_eq!(stats.per_difficulty_counts.get("1"), Some(&2));
        assert_eq!(stats.per_type_counts.get("MCQ"), Some(&4));
    }

    #[tokio::test]
    async fn bulk_import_and_delete_report_counts() {
        let state = state();
        let mut questions: Vec<_> = (0..30)
            .map(|i| input("chem", &format!("Q{}", i), 3))
            .collect();
        questions[0].title = "  ".to_string();

        let report = bulk_import(&state, BulkImportDto { questions }).await.unwrap();
        assert_eq!(report.affected_count, 29);
        assert_eq!(report.rejected_items.len(), 1);

        let report = bulk_delete(
            &state,
            BulkDeleteDto {
                subject_prefixes: vec!["chem".to_string()],
            },
        )
        .await
        .unwrap();
        assert_eq!(report.affected_count, 29);
        assert_eq!(report.chunk_count, 2);
    }

    #[tokio::test]
    async fn shutdown_cancels_exhaustive_requests() {
        let state = state();
        state.shutdown.cancel();
        let err = search_questions(
            &state,
            SearchQuestionsDto {
                search_term: "anything".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "cancelled");
    }

    #[test]
    fn partial_failure_carries_report_details() {
        let report = BatchWriteReport {
            affected_count: 25,
            chunk_count: 2,
            succeeded_chunks: vec![0],
            ..Default::default()
        };
        let err = CommandError::from(QueryError::PartialBatchFailure(report));
        assert_eq!(err.code, "partial_batch_failure");
        let details = err.details.unwrap();
        assert_eq!(details["affected_count"], 25);
        assert_matches!(details["succeeded_chunks"].as_array(), Some(a) if a.len() == 1);
    }
}
