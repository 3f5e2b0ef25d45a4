//! ログ初期化

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogConfig;

pub const LOG_FILE_PREFIX: &str = "chatrank.log";

/// ログ出力先ディレクトリ（未設定ならXDGデータディレクトリ配下）
pub fn log_directory(config: &LogConfig) -> Result<PathBuf> {
    match &config.log_dir {
        Some(dir) => Ok(dir.clone()),
        None => {
            let project_dirs = ProjectDirs::from("dev", "chatrank", "chatrank")
                .context("Failed to get project directories")?;
            Ok(project_dirs.data_dir().join("logs"))
        }
    }
}

/// ログを初期化
///
/// `RUST_LOG`が設定されていればそちらを優先する。ファイル出力を有効にした場合は
/// 返されたガードをプロセス終了まで保持すること。
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("Invalid log level")?;

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let (file_layer, guard, log_dir) = if config.enable_file_logging {
        let log_dir = log_directory(config)?;
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

        let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard), Some(log_dir))
    } else {
        (None, None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    if let Some(log_dir) = log_dir {
        tracing::info!("📝 Writing logs to {}", log_dir.display());
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_prefers_config() {
        let config = LogConfig {
            log_dir: Some(PathBuf::from("/tmp/chatrank-logs")),
            ..LogConfig::default()
        };
        assert_eq!(
            log_directory(&config).unwrap(),
            PathBuf::from("/tmp/chatrank-logs")
        );
    }

    #[test]
    fn test_default_log_directory_is_under_data_dir() {
        let config = LogConfig::default();
        if let Ok(dir) = log_directory(&config) {
            assert!(dir.ends_with("logs"));
        }
    }
}
