//! 引擎配置
//!
//! 加载顺序：默认值 → 可选的 `qbank.toml` → `QBANK__*` 环境变量（`.env` 由 dotenvy 预先加载）。

use crate::services::store::{MAX_BATCH_GET, MAX_BATCH_WRITE};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 批量读取未处理键的重试退避参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_times: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 50,
            max_delay_ms: 2_000,
            max_times: 5,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> backon::ExponentialBuilder {
        backon::ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms.max(self.min_delay_ms)))
            .with_max_times(self.max_times)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 数据库文件路径，未设置时使用应用数据目录
    pub database_path: Option<PathBuf>,
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// 全量枚举时每次查询评估的记录数
    pub scan_page_size: usize,
    /// 全量枚举的页数上限，`None` 表示不限
    pub max_scan_pages: Option<usize>,
    pub read_batch_size: usize,
    pub write_batch_size: usize,
    pub hydrate_concurrency: usize,
    pub write_concurrency: usize,
    pub request_timeout_ms: u64,
    /// 固定随机种子，便于复现抽题结果
    pub sampling_seed: Option<u64>,
    pub retry: RetryConfig,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            default_page_size: 50,
            max_page_size: 500,
            scan_page_size: 1_000,
            max_scan_pages: None,
            read_batch_size: MAX_BATCH_GET,
            write_batch_size: MAX_BATCH_WRITE,
            hydrate_concurrency: 4,
            write_concurrency: 4,
            request_timeout_ms: 30_000,
            sampling_seed: None,
            retry: RetryConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// 从默认位置加载
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_from(Path::new("qbank.toml"))
    }

    /// 从指定配置文件（可不存在）与环境变量加载
    pub fn load_from(file: &Path) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if file.exists() {
            builder = builder.add_source(config::File::from(file));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("QBANK")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let loaded = builder
            .build()
            .with_context(|| format!("failed to read configuration from {}", file.display()))?;
        let cfg: EngineConfig = loaded
            .try_deserialize()
            .context("invalid engine configuration")?;
        Ok(cfg.normalized())
    }

    /// 将批量大小夹在存储限制内，并保证各项至少为 1
    pub fn normalized(mut self) -> Self {
        self.read_batch_size = self.read_batch_size.clamp(1, MAX_BATCH_GET);
        self.write_batch_size = self.write_batch_size.clamp(1, MAX_BATCH_WRITE);
        self.max_page_size = self.max_page_size.max(1);
        self.default_page_size = self.default_page_size.clamp(1, self.max_page_size);
        self.scan_page_size = self.scan_page_size.max(1);
        self.hydrate_concurrency = self.hydrate_concurrency.max(1);
        self.write_concurrency = self.write_concurrency.max(1);
        self
    }

    /// 解析调用方请求的页大小；0 或缺省使用默认值
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(n) if n > 0 => n.min(self.max_page_size),
            _ => self.default_page_size,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
