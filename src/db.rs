// 数据库连接模块
// 打开 SQLite 连接并建立 content_items 宽表

use crate::services::error::{QueryError, QueryResult};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS content_items (
        pk TEXT NOT NULL,
        sk TEXT NOT NULL,
        gsi1_pk TEXT,
        gsi1_sk TEXT,
        attributes TEXT NOT NULL DEFAULT '{}',
        PRIMARY KEY (pk, sk)
    );

    CREATE INDEX IF NOT EXISTS idx_content_items_gsi1
        ON content_items(gsi1_pk, gsi1_sk, pk, sk);
";

/// 打开（必要时创建）磁盘数据库并初始化宽表结构
pub fn open_database(db_path: &Path) -> QueryResult<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                QueryError::StoreUnavailable(format!(
                    "Failed to create data dir {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )?;

    // WAL 日志；写入同步降为 NORMAL
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        PRAGMA foreign_keys = OFF;
    ",
    )?;

    init_schema(&conn)?;
    log::info!("opened content store at {}", db_path.display());
    Ok(conn)
}

/// 内存数据库，供测试与临时数据集使用
pub fn open_in_memory() -> QueryResult<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> QueryResult<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
