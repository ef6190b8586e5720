// 工具模块
// 数据目录定位与日志初始化

use log::LevelFilter;
use std::path::PathBuf;
use std::str::FromStr;

pub fn get_app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("qbank")
}

pub fn get_database_path() -> PathBuf {
    let mut path = get_app_data_dir();
    path.push("qbank.db");
    path
}

/// 解析日志级别，无法识别时退回 info
pub fn parse_level(level: &str) -> LevelFilter {
    LevelFilter::from_str(level.trim()).unwrap_or(LevelFilter::Info)
}

/// 初始化日志系统
///
/// 输出到 stderr，stdout 保留给 JSON-lines 应答。
pub fn init_logger(level: &str) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(parse_level(level))
        // SQLite 驱动的调试输出过于冗长
        .level_for("rusqlite", LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_lives_under_app_data_dir() {
        let db = get_database_path();
        assert!(db.starts_with(get_app_data_dir()));
        assert_eq!(db.file_name().unwrap(), "qbank.db");
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level(" WARN "), LevelFilter::Warn);
        assert_eq!(parse_level("chatty"), LevelFilter::Info);
    }
}
