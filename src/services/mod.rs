// 服务模块
// 提供存储抽象、键空间映射与查询引擎

pub mod error;
pub mod hydration;
pub mod keyspace;
pub mod pagination;
pub mod query_engine;
pub mod sampling;
pub mod sqlite_store;
pub mod store;
pub mod token;

#[cfg(test)]
mod test_support;

pub use error::{QueryError, QueryResult};

pub use store::{
    BatchGetOutput,
    ContentStore,
    ContinuationToken,
    Page,
    Projection,
    QuerySpec,
    StoreKey,
    StoredItem,
    WriteRequest,
    MAX_BATCH_GET,
    MAX_BATCH_WRITE,
};

pub use query_engine::QueryEngine;
pub use sqlite_store::SqliteContentStore;
pub use token::{decode_token, decode_token_strict, encode_token};
