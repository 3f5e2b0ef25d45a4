//! アプリケーション設定管理モジュール
//!
//! XDGディレクトリを使用した設定ファイルの永続化と管理を提供します。

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 配信元の利用枠を守るための最小ポーリング間隔
pub const MIN_POLL_FLOOR_MS: u64 = 10_000;

/// APIキーを上書きする環境変数
pub const API_KEY_ENV: &str = "YOUTUBE_API_KEY";

/// ポーリング設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// ポーリング間隔の下限（配信元の推奨値がこれより短くても待つ）
    pub min_poll_interval_ms: u64,
    /// 一時エラー後の再試行までの待ち時間
    pub error_retry_delay_ms: u64,
    /// 初回（読み捨て）取得後の待ち時間
    pub first_fetch_settle_ms: u64,
    /// 連続エラーの許容回数（これを超えると追跡停止）
    pub max_consecutive_errors: u32,
    /// 1回の取得のタイムアウト
    pub fetch_timeout_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            min_poll_interval_ms: MIN_POLL_FLOOR_MS,
            error_retry_delay_ms: 5_000,
            first_fetch_settle_ms: 2_000,
            max_consecutive_errors: 5,
            fetch_timeout_ms: 15_000,
        }
    }
}

impl PollingConfig {
    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_ms)
    }

    pub fn error_retry_delay(&self) -> Duration {
        Duration::from_millis(self.error_retry_delay_ms)
    }

    pub fn first_fetch_settle(&self) -> Duration {
        Duration::from_millis(self.first_fetch_settle_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// 配信元の推奨間隔と下限の大きい方
    pub fn poll_interval(&self, suggested: Duration) -> Duration {
        suggested.max(self.min_poll_interval())
    }
}

/// 追跡コントローラー設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// 停止時にポーリングタスクの終了を待つ上限
    pub stop_timeout_ms: u64,
    /// リセット時に書き込みタスクの終了を待つ上限
    pub writer_stop_timeout_ms: u64,
    pub polling: PollingConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 5_000,
            writer_stop_timeout_ms: 2_000,
            polling: PollingConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn writer_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.writer_stop_timeout_ms)
    }
}

/// ログ設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// カスタムログディレクトリ（Noneの場合はXDGデフォルト使用）
    pub log_dir: Option<PathBuf>,
    /// ログレベル (trace/debug/info/warn/error)
    pub log_level: String,
    /// ファイル出力有効化
    pub enable_file_logging: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_level: "info".to_string(),
            enable_file_logging: false,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// YouTube Data API v3 キー
    pub api_key: String,
    /// データベースファイル（Noneの場合はXDGデフォルト使用）
    pub database_path: Option<PathBuf>,
    pub controller: ControllerConfig,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            database_path: None,
            controller: ControllerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 環境変数の上書きと値の補正を適用
    pub fn resolved(mut self) -> Self {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.api_key = key.trim().to_string();
            }
        }

        let polling = &mut self.controller.polling;
        if polling.min_poll_interval_ms < MIN_POLL_FLOOR_MS {
            warn!(
                "min_poll_interval_ms={} is below the {}ms floor, clamping",
                polling.min_poll_interval_ms, MIN_POLL_FLOOR_MS
            );
            polling.min_poll_interval_ms = MIN_POLL_FLOOR_MS;
        }
        if polling.max_consecutive_errors == 0 {
            polling.max_consecutive_errors = PollingConfig::default().max_consecutive_errors;
        }

        self
    }

    /// データベースパス（未設定ならXDGデータディレクトリ）
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => crate::database::get_database_path(),
        }
    }
}

/// 読み込んだ設定と、デフォルトを書き出したかどうか
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub created_default: bool,
}

/// 設定管理マネージャー
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// 新しい設定マネージャーを作成
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::with_path(config_path)
    }

    /// 任意のパスで設定マネージャーを作成
    pub fn with_path(config_path: impl Into<PathBuf>) -> Result<Self> {
        let config_path = config_path.into();

        // 設定ディレクトリを作成（存在しない場合）
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        Ok(Self { config_path })
    }

    /// XDGディレクトリに基づく設定ファイルパスを取得
    fn get_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("dev", "chatrank", "chatrank")
            .context("Failed to get project directories")?;

        Ok(project_dirs.config_dir().join("config.toml"))
    }

    /// 設定を読み込み（ファイルがなければデフォルトを書き出す）
    pub fn load_config(&self) -> Result<AppConfig> {
        let loaded = self.read_config()?;
        self.report_loaded(&loaded);
        Ok(loaded.config)
    }

    /// ログを出さずに設定を読み込む
    ///
    /// ログ設定自体がこのファイルにあるため、起動時はこちらで読んでから
    /// ログを初期化し、[`ConfigManager::report_loaded`]で結果を記録する。
    pub fn read_config(&self) -> Result<LoadedConfig> {
        if !self.config_path.exists() {
            let config = AppConfig::default();
            self.write_config_file(&config)?;
            return Ok(LoadedConfig {
                config,
                created_default: true,
            });
        }

        let config_content = fs::read_to_string(&self.config_path).with_context(|| {
            format!("Failed to read config file: {}", self.config_path.display())
        })?;

        let config: AppConfig = toml::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse config file: {}",
                self.config_path.display()
            )
        })?;

        Ok(LoadedConfig {
            config,
            created_default: false,
        })
    }

    pub fn report_loaded(&self, loaded: &LoadedConfig) {
        if loaded.created_default {
            info!(
                "Config file not found, wrote default settings: {}",
                self.config_path.display()
            );
        } else {
            info!(
                "✅ Configuration loaded from: {}",
                self.config_path.display()
            );
        }
        debug!("⚙️ Config file: {}", self.config_path.display());
    }

    /// 設定を保存
    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        self.write_config_file(config)?;
        info!("💾 Configuration saved to: {}", self.config_path.display());
        Ok(())
    }

    fn write_config_file(&self, config: &AppConfig) -> Result<()> {
        let config_content =
            toml::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(&self.config_path, config_content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })
    }

    /// 設定ファイルパスを取得
    pub fn get_config_file_path(&self) -> &PathBuf {
        &self.config_path
    }
}
