// 题库内容查询引擎进程入口
// stdin 逐行读取 JSON 请求，stdout 逐行写出应答

use anyhow::Context;
use qbank_engine::commands::{self, EngineState, Request};
use qbank_engine::{utils, EngineConfig, QueryEngine, SqliteContentStore};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::load()?;
    utils::init_logger(&config.log_level).context("failed to install logger")?;

    let db_path = config
        .database_path
        .clone()
        .unwrap_or_else(utils::get_database_path);
    let store = SqliteContentStore::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;

    let engine = Arc::new(QueryEngine::new(Arc::new(store), config));
    let state = EngineState::new(engine);

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    log::info!("qbank-engine {} ready", env!("CARGO_PKG_VERSION"));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<Request>(&line) {
            Ok(req) => commands::dispatch(&state, req).await,
            Err(e) => serde_json::json!({
                "ok": false,
                "error": { "code": "bad_json", "message": e.to_string() },
            }),
        };

        let mut out = serde_json::to_string(&resp)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    log::info!("stdin closed, exiting");
    Ok(())
}
