//! 宽表存储抽象
//!
//! 以键值/文档存储的协议建模：按索引分区键 + 排序键前缀查询、带命名参数的
//! 过滤表达式、投影、单次上限与续页键；批量读取每次至多 100 个键，批量写入
//! 每次至多 25 条。超限的调用由存储直接拒绝，分块必须在客户端完成。

use crate::services::error::QueryResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// 单次批量读取的键数上限
pub const MAX_BATCH_GET: usize = 100;

/// 单次批量写入/删除的条目上限
pub const MAX_BATCH_WRITE: usize = 25;

/// 表主键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreKey {
    pub pk: String,
    pub sk: String,
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pk, self.sk)
    }
}

/// 续页令牌：上一页最后一条被评估记录的完整键
///
/// 对调用方不透明，必须原样回传。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationToken {
    #[serde(rename = "PK")]
    pub pk: String,
    #[serde(rename = "SK")]
    pub sk: String,
    #[serde(rename = "GSI1PK", default, skip_serializing_if = "Option::is_none")]
    pub gsi1_pk: Option<String>,
    #[serde(rename = "GSI1SK", default, skip_serializing_if = "Option::is_none")]
    pub gsi1_sk: Option<String>,
}

/// 宽表中的一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
    pub pk: String,
    pub sk: String,
    pub gsi1_pk: Option<String>,
    pub gsi1_sk: Option<String>,
    pub attributes: Map<String, Value>,
}

impl StoredItem {
    pub fn key(&self) -> StoreKey {
        StoreKey {
            pk: self.pk.clone(),
            sk: self.sk.clone(),
        }
    }

    pub fn continuation_token(&self) -> ContinuationToken {
        ContinuationToken {
            pk: self.pk.clone(),
            sk: self.sk.clone(),
            gsi1_pk: self.gsi1_pk.clone(),
            gsi1_sk: self.gsi1_sk.clone(),
        }
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    pub fn attr_i64(&self, name: &str) -> Option<i64> {
        self.attributes.get(name).and_then(Value::as_i64)
    }
}

/// 查询所用的索引
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableIndex {
    /// 表主键 (pk, sk)
    Primary,
    /// 二级索引 (gsi1_pk, gsi1_sk)
    Gsi1,
}

/// 键条件：分区键相等 + 可选的排序键前缀
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCondition {
    pub partition: String,
    pub sort_prefix: Option<String>,
}

/// 过滤比较符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equals,
    Contains,
    BeginsWith,
}

/// 过滤子句，只引用名称与取值的占位符
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterClause {
    pub comparator: Comparator,
    pub name_ref: String,
    pub value_ref: String,
}

/// 过滤表达式
///
/// 属性名经 `#nN` 别名、取值经 `:vN` 占位符映射，避免与保留字（如 `type`）冲突，
/// 调用方输入永不拼接进表达式文本。子句之间为 AND 关系。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterExpression {
    clauses: Vec<FilterClause>,
    names: BTreeMap<String, String>,
    values: BTreeMap<String, Value>,
}

impl FilterExpression {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个 AND 子句
    pub fn and(mut self, attribute: &str, comparator: Comparator, value: impl Into<Value>) -> Self {
        let name_ref = match self.names.iter().find(|(_, v)| v.as_str() == attribute) {
            Some((alias, _)) => alias.clone(),
            None => {
                let alias = format!("#n{}", self.names.len());
                self.names.insert(alias.clone(), attribute.to_string());
                alias
            }
        };
        let value_ref = format!(":v{}", self.values.len());
        self.values.insert(value_ref.clone(), value.into());
        self.clauses.push(FilterClause {
            comparator,
            name_ref,
            value_ref,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    pub fn names(&self) -> &BTreeMap<String, String> {
        &self.names
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// 解析子句的占位符为 (属性名, 取值)
    pub fn resolve<'a>(&'a self, clause: &FilterClause) -> Option<(&'a str, &'a Value)> {
        let name = self.names.get(&clause.name_ref)?;
        let value = self.values.get(&clause.value_ref)?;
        Some((name.as_str(), value))
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, clause) in self.clauses.iter().enumerate() {
            if idx > 0 {
                f.write_str(" AND ")?;
            }
            match clause.comparator {
                Comparator::Equals => write!(f, "{} = {}", clause.name_ref, clause.value_ref)?,
                Comparator::Contains => {
                    write!(f, "contains({}, {})", clause.name_ref, clause.value_ref)?
                }
                Comparator::BeginsWith => {
                    write!(f, "begins_with({}, {})", clause.name_ref, clause.value_ref)?
                }
            }
        }
        Ok(())
    }
}

/// 完整的查询规格
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub index: TableIndex,
    pub key: KeyCondition,
    pub filter: FilterExpression,
}

/// 投影
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// 仅键字段
    KeysOnly,
    /// 键字段 + 指定属性
    Attributes(Vec<String>),
    /// 全部属性
    All,
}

/// 单次查询返回的一页
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<StoredItem>,
    pub last_evaluated_key: Option<ContinuationToken>,
}

/// 批量读取结果；存储可能只处理部分键
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGetOutput {
    pub items: Vec<StoredItem>,
    pub unprocessed_keys: Vec<StoreKey>,
}

/// 批量写入请求
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    Put(StoredItem),
    Delete(StoreKey),
}

/// 内容存储
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// 单次有界查询；`limit` 为本次最多评估的记录数
    async fn query(
        &self,
        spec: &QuerySpec,
        projection: &Projection,
        limit: usize,
        exclusive_start_key: Option<&ContinuationToken>,
    ) -> QueryResult<Page>;

    /// 批量读取，`keys.len()` 不得超过 [`MAX_BATCH_GET`]
    async fn batch_get(&self, keys: &[StoreKey]) -> QueryResult<BatchGetOutput>;

    /// 批量写入/删除，`requests.len()` 不得超过 [`MAX_BATCH_WRITE`]
    async fn batch_write(&self, requests: Vec<WriteRequest>) -> QueryResult<()>;

    async fn get_item(&self, key: &StoreKey) -> QueryResult<Option<StoredItem>>;

    async fn put_item(&self, item: StoredItem) -> QueryResult<()>;

    /// 返回记录是否存在
    async fn delete_item(&self, key: &StoreKey) -> QueryResult<bool>;
}
