// 题库内容查询引擎
// 过滤、分页、随机抽题与批量水合

pub mod commands;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

pub use config::EngineConfig;
pub use services::{QueryEngine, QueryError, QueryResult, SqliteContentStore};
