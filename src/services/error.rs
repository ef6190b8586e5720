//! 查询引擎统一错误类型
//!
//! 读路径（分页/随机/搜索/统计）全有或全无；批量写路径通过
//! `PartialBatchFailure` 报告哪些分块成功、哪些失败。

use crate::models::BatchWriteReport;
use thiserror::Error;

/// 查询引擎结果类型别名
pub type QueryResult<T> = Result<T, QueryError>;

/// 查询引擎错误
#[derive(Debug, Error)]
pub enum QueryError {
    /// 调用方传入的过滤条件非法（题型/难度超出枚举范围等）
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// 题目数据不满足不变量（权重、正确选项数量等）
    #[error("invalid question: {0}")]
    InvalidQuestion(String),

    /// 存储后端不可用或调用失败，原样向上传播，核心层不重试
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// 单次批量调用超过存储限制
    #[error("{operation} of {requested} items exceeds the store limit of {limit}")]
    BatchLimitExceeded {
        operation: &'static str,
        requested: usize,
        limit: usize,
    },

    /// 续页令牌无法解析；调用方应退化为从头开始
    #[error("malformed continuation token: {0}")]
    MalformedContinuationToken(String),

    /// 批量写入部分分块失败
    #[error(
        "partial batch failure: {} of {} chunk(s) failed, {} item(s) written",
        .0.failed_chunks.len(),
        .0.chunk_count,
        .0.affected_count
    )]
    PartialBatchFailure(BatchWriteReport),

    /// 水合时部分键在存储中已不存在
    #[error("{missing} of {requested} key(s) could not be hydrated, first missing: {first}")]
    IncompleteHydration {
        missing: usize,
        requested: usize,
        first: String,
    },

    /// 全量扫描超过配置的页数上限
    #[error("exhaustive scan exceeded the configured cap of {0} page(s)")]
    ScanLimitExceeded(usize),

    /// 请求被取消或超过截止时间
    #[error("operation cancelled")]
    Cancelled,

    /// 存储中的记录无法反序列化
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 存储记录缺少必需字段或字段格式错误
    #[error("malformed stored item {key}: {reason}")]
    MalformedItem { key: String, reason: String },
}

impl QueryError {
    /// 稳定的错误码，供命令层与 IPC 响应使用
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::InvalidFilter(_) => "invalid_filter",
            QueryError::InvalidQuestion(_) => "invalid_question",
            QueryError::StoreUnavailable(_) => "store_unavailable",
            QueryError::BatchLimitExceeded { .. } => "batch_limit_exceeded",
            QueryError::MalformedContinuationToken(_) => "malformed_continuation_token",
            QueryError::PartialBatchFailure(_) => "partial_batch_failure",
            QueryError::IncompleteHydration { .. } => "incomplete_hydration",
            QueryError::ScanLimitExceeded(_) => "scan_limit_exceeded",
            QueryError::Cancelled => "cancelled",
            QueryError::Serialization(_) => "serialization",
            QueryError::MalformedItem { .. } => "malformed_item",
        }
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(e: rusqlite::Error) -> Self {
        QueryError::StoreUnavailable(e.to_string())
    }
}
