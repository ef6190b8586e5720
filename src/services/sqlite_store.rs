// SQLite 宽表存储
// 以单表 content_items 模拟键值/文档存储：主键 (pk, sk)，二级索引 (gsi1_pk, gsi1_sk)

use crate::db;
use crate::services::error::{QueryError, QueryResult};
use crate::services::store::{
    BatchGetOutput, Comparator, ContentStore, ContinuationToken, Page, Projection, QuerySpec,
    StoreKey, StoredItem, TableIndex, WriteRequest, MAX_BATCH_GET, MAX_BATCH_WRITE,
};
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const ITEM_COLUMNS: &str = "pk, sk, gsi1_pk, gsi1_sk";

/// SQLite 实现的内容存储
#[derive(Clone)]
pub struct SqliteContentStore {
    conn: Arc<Mutex<Connection>>,
}

type RawRow = (String, String, Option<String>, Option<String>, Option<String>);

impl SqliteContentStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// 打开磁盘数据库
    pub fn open(db_path: &Path) -> QueryResult<Self> {
        Ok(Self::new(db::open_database(db_path)?))
    }

    /// 内存数据库
    pub fn in_memory() -> QueryResult<Self> {
        Ok(Self::new(db::open_in_memory()?))
    }

    fn conn(&self) -> QueryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| QueryError::StoreUnavailable(format!("connection lock poisoned: {}", e)))
    }

    // ==================== 查询 ====================

    fn query_sync(
        &self,
        spec: &QuerySpec,
        projection: &Projection,
        limit: usize,
        exclusive_start_key: Option<&ContinuationToken>,
    ) -> QueryResult<Page> {
        if limit == 0 {
            return Ok(Page::default());
        }

        let mut params: Vec<SqlValue> = Vec::new();
        let attribute_column = match projection {
            Projection::KeysOnly => "NULL".to_string(),
            Projection::All => "attributes".to_string(),
            Projection::Attributes(names) if names.is_empty() => "NULL".to_string(),
            Projection::Attributes(names) => {
                let mut pairs = Vec::with_capacity(names.len());
                for name in names {
                    pairs.push("?, attributes -> ?");
                    params.push(SqlValue::Text(name.clone()));
                    params.push(SqlValue::Text(json_path(name)));
                }
                format!("json_object({})", pairs.join(", "))
            }
        };

        let (pk_col, sk_col) = match spec.index {
            TableIndex::Primary => ("pk", "sk"),
            TableIndex::Gsi1 => ("gsi1_pk", "gsi1_sk"),
        };

        let mut sql = format!(
            "SELECT {}, {} FROM content_items WHERE {} = ?",
            ITEM_COLUMNS, attribute_column, pk_col
        );
        params.push(SqlValue::Text(spec.key.partition.clone()));

        if let Some(prefix) = &spec.key.sort_prefix {
            sql.push_str(&format!(" AND substr({}, 1, length(?)) = ?", sk_col));
            params.push(SqlValue::Text(prefix.clone()));
            params.push(SqlValue::Text(prefix.clone()));
        }

        if let Some(start) = exclusive_start_key {
            match spec.index {
                TableIndex::Primary => {
                    sql.push_str(" AND sk > ?");
                    params.push(SqlValue::Text(start.sk.clone()));
                }
                TableIndex::Gsi1 => {
                    let index_sk = start.gsi1_sk.clone().ok_or_else(|| {
                        QueryError::MalformedContinuationToken(
                            "index query requires GSI1SK in the start key".to_string(),
                        )
                    })?;
                    sql.push_str(" AND (gsi1_sk, pk, sk) > (?, ?, ?)");
                    params.push(SqlValue::Text(index_sk));
                    params.push(SqlValue::Text(start.pk.clone()));
                    params.push(SqlValue::Text(start.sk.clone()));
                }
            }
        }

        for clause in spec.filter.clauses() {
            let (name, value) = spec.filter.resolve(clause).ok_or_else(|| {
                QueryError::InvalidFilter(format!(
                    "unbound placeholder in clause {} / {}",
                    clause.name_ref, clause.value_ref
                ))
            })?;
            let path = SqlValue::Text(json_path(name));
            let value = to_sql_value(value);
            match clause.comparator {
                Comparator::Equals => {
                    sql.push_str(" AND json_extract(attributes, ?) = ?");
                    params.push(path);
                    params.push(value);
                }
                Comparator::Contains => {
                    sql.push_str(" AND instr(json_extract(attributes, ?), ?) > 0");
                    params.push(path);
                    params.push(value);
                }
                Comparator::BeginsWith => {
                    sql.push_str(" AND substr(json_extract(attributes, ?), 1, length(?)) = ?");
                    params.push(path);
                    params.push(value.clone());
                    params.push(value);
                }
            }
        }

        match spec.index {
            TableIndex::Primary => sql.push_str(" ORDER BY sk"),
            TableIndex::Gsi1 => sql.push_str(" ORDER BY gsi1_sk, pk, sk"),
        }
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(limit as i64));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), Self::read_row)?;

        let mut raw_rows = Vec::new();
        for row in rows {
            raw_rows.push(row?);
        }
        drop(stmt);
        drop(conn);

        let items = raw_rows
            .into_iter()
            .map(Self::raw_to_item)
            .collect::<QueryResult<Vec<_>>>()?;

        let last_evaluated_key = if items.len() == limit {
            items.last().map(StoredItem::continuation_token)
        } else {
            None
        };

        log::debug!(
            "query {:?} partition={} prefix={:?} filter=[{}] -> {} item(s), more={}",
            spec.index,
            spec.key.partition,
            spec.key.sort_prefix,
            spec.filter,
            items.len(),
            last_evaluated_key.is_some()
        );

        Ok(Page {
            items,
            last_evaluated_key,
        })
    }

    // ==================== 批量读写 ====================

    fn batch_get_sync(&self, keys: &[StoreKey]) -> QueryResult<BatchGetOutput> {
        if keys.len() > MAX_BATCH_GET {
            return Err(QueryError::BatchLimitExceeded {
                operation: "batch get",
                requested: keys.len(),
                limit: MAX_BATCH_GET,
            });
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, attributes FROM content_items WHERE pk = ?1 AND sk = ?2",
            ITEM_COLUMNS
        ))?;

        let mut raw_rows = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(row) = stmt
                .query_row(rusqlite::params![key.pk, key.sk], Self::read_row)
                .optional()?
            {
                raw_rows.push(row);
            }
        }
        drop(stmt);
        drop(conn);

        let items = raw_rows
            .into_iter()
            .map(Self::raw_to_item)
            .collect::<QueryResult<Vec<_>>>()?;

        Ok(BatchGetOutput {
            items,
            unprocessed_keys: Vec::new(),
        })
    }

    fn batch_write_sync(&self, requests: Vec<WriteRequest>) -> QueryResult<()> {
        if requests.len() > MAX_BATCH_WRITE {
            return Err(QueryError::BatchLimitExceeded {
                operation: "batch write",
                requested: requests.len(),
                limit: MAX_BATCH_WRITE,
            });
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut put = tx.prepare(
                "INSERT OR REPLACE INTO content_items (pk, sk, gsi1_pk, gsi1_sk, attributes)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut delete = tx.prepare("DELETE FROM content_items WHERE pk = ?1 AND sk = ?2")?;

            for request in &requests {
                match request {
                    WriteRequest::Put(item) => {
                        let attributes = serde_json::to_string(&item.attributes)?;
                        put.execute(rusqlite::params![
                            item.pk,
                            item.sk,
                            item.gsi1_pk,
                            item.gsi1_sk,
                            attributes,
                        ])?;
                    }
                    WriteRequest::Delete(key) => {
                        delete.execute(rusqlite::params![key.pk, key.sk])?;
                    }
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_item_sync(&self, key: &StoreKey) -> QueryResult<Option<StoredItem>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {}, attributes FROM content_items WHERE pk = ?1 AND sk = ?2",
                    ITEM_COLUMNS
                ),
                rusqlite::params![key.pk, key.sk],
                Self::read_row,
            )
            .optional()?;
        drop(conn);
        raw.map(Self::raw_to_item).transpose()
    }

    fn delete_item_sync(&self, key: &StoreKey) -> QueryResult<bool> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "DELETE FROM content_items WHERE pk = ?1 AND sk = ?2",
            rusqlite::params![key.pk, key.sk],
        )?;
        Ok(affected > 0)
    }

    // ==================== 辅助方法 ====================

    fn read_row(row: &Row) -> Result<RawRow, rusqlite::Error> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }

    fn raw_to_item((pk, sk, gsi1_pk, gsi1_sk, attributes): RawRow) -> QueryResult<StoredItem> {
        let attributes = match attributes {
            Some(text) => {
                let mut map: Map<String, Value> = serde_json::from_str(&text)?;
                // 投影中缺失的属性以 null 返回，去掉以保持与缺失字段一致
                map.retain(|_, v| !v.is_null());
                map
            }
            None => Map::new(),
        };
        Ok(StoredItem {
            pk,
            sk,
            gsi1_pk,
            gsi1_sk,
            attributes,
        })
    }
}

#[async_trait]
impl ContentStore for SqliteContentStore {
    async fn query(
        &self,
        spec: &QuerySpec,
        projection: &Projection,
        limit: usize,
        exclusive_start_key: Option<&ContinuationToken>,
    ) -> QueryResult<Page> {
        self.query_sync(spec, projection, limit, exclusive_start_key)
    }

    async fn batch_get(&self, keys: &[StoreKey]) -> QueryResult<BatchGetOutput> {
        self.batch_get_sync(keys)
    }

    async fn batch_write(&self, requests: Vec<WriteRequest>) -> QueryResult<()> {
        self.batch_write_sync(requests)
    }

    async fn get_item(&self, key: &StoreKey) -> QueryResult<Option<StoredItem>> {
        self.get_item_sync(key)
    }

    async fn put_item(&self, item: StoredItem) -> QueryResult<()> {
        self.batch_write_sync(vec![WriteRequest::Put(item)])
    }

    async fn delete_item(&self, key: &StoreKey) -> QueryResult<bool> {
        self.delete_item_sync(key)
    }
}

fn json_path(attribute: &str) -> String {
    format!("$.\"{}\"", attribute.replace('"', "\\\""))
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}
