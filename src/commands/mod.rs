// 命令模块
// 提供 JSON-lines 请求的分发与应答封装

pub mod questions;

pub use questions::{
    bulk_delete,
    bulk_import,
    delete_question,
    get_question,
    get_stats,
    put_question,
    query_questions,
    search_questions,
    BulkDeleteDto,
    BulkImportDto,
    CommandError,
    CommandResult,
    EngineState,
    QueryQuestionsDto,
    QuestionDto,
    QuestionInputDto,
    QuestionKeyDto,
    QuestionPageDto,
    QuestionStatsDto,
    SearchQuestionsDto,
    StatsDto,
};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// 单行请求
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

pub fn ok(id: &str, result: Value) -> Value {
    json!({
        "id": id,
        "ok": true,
        "result": result,
    })
}

pub fn err(id: &str, error: &CommandError) -> Value {
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

fn parse_params<T: DeserializeOwned>(params: Value) -> CommandResult<T> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| CommandError::bad_params(e.to_string()))
}

fn to_result<T: Serialize>(result: CommandResult<T>) -> CommandResult<Value> {
    result.and_then(|v| {
        serde_json::to_value(v).map_err(|e| CommandError {
            code: "serialization".to_string(),
            message: e.to_string(),
            details: None,
        })
    })
}

/// 按方法名分发请求
pub async fn dispatch(state: &EngineState, req: Request) -> Value {
    let Request { id, method, params } = req;
    log::debug!("request {} -> {}", id, method);

    let result = match method.as_str() {
        "health" => Ok(json!({ "version": env!("CARGO_PKG_VERSION") })),
        "questions.query" => match parse_params(params) {
            Ok(p) => to_result(query_questions(state, p).await),
            Err(e) => Err(e),
        },
        "questions.search" => match parse_params(params) {
            Ok(p) => to_result(search_questions(state, p).await),
            Err(e) => Err(e),
        },
        "questions.stats" => match parse_params(params) {
            Ok(p) => to_result(get_stats(state, p).await),
            Err(e) => Err(e),
        },
        "questions.get" => match parse_params(params) {
            Ok(p) => to_result(get_question(state, p).await),
            Err(e) => Err(e),
        },
        "questions.put" => match parse_params(params) {
            Ok(p) => to_result(put_question(state, p).await),
            Err(e) => Err(e),
        },
        "questions.delete" => match parse_params(params) {
            Ok(p) => to_result(delete_question(state, p).await),
            Err(e) => Err(e),
        },
        "questions.bulkDelete" => match parse_params(params) {
            Ok(p) => to_result(bulk_delete(state, p).await),
            Err(e) => Err(e),
        },
        "questions.bulkImport" => match parse_params(params) {
            Ok(p) => to_result(bulk_import(state, p).await),
            Err(e) => Err(e),
        },
        other => Err(CommandError {
            code: "not_implemented".to_string(),
            message: format!("unknown method: {}", other),
            details: None,
        }),
    };

    match result {
        Ok(value) => ok(&id, value),
        Err(e) => {
            log::warn!("request {} ({}) failed: {} {}", id, method, e.code, e.message);
            err(&id, &e)
        }
    }
}
