//! chatrank - YouTubeライブチャットの発言数ランキング

use anyhow::{Context, Result};
use chatrank::{
    api::youtube::{ApiKey, YoutubeDataApi},
    config::{AppConfig, ConfigManager, API_KEY_ENV},
    logging,
    tracking::StopReason,
    ChatStats, RankingEntry, RankingService, ResetSummary, TrackingController,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "chatrank")]
#[command(about = "Live chat leaderboard for YouTube streams")]
#[command(version)]
struct Cli {
    /// 設定ファイル（省略時はXDG設定ディレクトリ）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// データベースファイル（設定より優先）
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track a live stream until Ctrl-C
    Track {
        /// Video id or watch URL
        stream: String,
        /// Leaderboard size printed while tracking
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// Seconds between leaderboard refreshes
        #[arg(long, default_value_t = 15)]
        refresh_secs: u64,
    },
    /// Print the current leaderboard
    Rankings {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Print message statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Delete all collected data
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path)?,
        None => ConfigManager::new()?,
    };
    let loaded = config_manager.read_config()?;

    // 読み込み結果はログ初期化後に記録する
    let _log_guard = logging::init_logging(&loaded.config.log)?;
    config_manager.report_loaded(&loaded);

    let mut config = loaded.config.resolved();
    if let Some(db) = cli.db {
        config.database_path = Some(db);
    }

    match cli.command {
        Commands::Track {
            stream,
            limit,
            refresh_secs,
        } => track(&config, &stream, limit, Duration::from_secs(refresh_secs)).await,
        Commands::Rankings { limit, json } => {
            let rankings = RankingService::new(config.database_path()?).top_n(limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rankings)?);
            } else {
                print_rankings(&rankings);
            }
            Ok(())
        }
        Commands::Stats { json } => {
            let stats = RankingService::new(config.database_path()?).stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
            Ok(())
        }
        Commands::Reset => {
            let controller = build_controller(&config)?;
            let summary = controller.reset().await?;
            controller.shutdown().await?;
            print_reset(&summary);
            Ok(())
        }
    }
}

fn build_controller(config: &AppConfig) -> Result<TrackingController> {
    let source = YoutubeDataApi::new(ApiKey::new(config.api_key.clone()))
        .with_request_timeout(config.controller.polling.fetch_timeout());
    Ok(TrackingController::new(
        Arc::new(source),
        config.database_path()?,
        config.controller.clone(),
    ))
}

async fn track(config: &AppConfig, stream: &str, limit: usize, refresh: Duration) -> Result<()> {
    if config.api_key.is_empty() {
        anyhow::bail!(
            "No API key configured. Set api_key in the config file or {}",
            API_KEY_ENV
        );
    }

    let controller = build_controller(config)?;
    controller.authenticate().await?;
    controller.start(stream).await?;

    let mut ticker = tokio::time::interval(refresh);
    ticker.tick().await;
    let mut fatal = None;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                tracing::info!("🛑 Ctrl-C received, stopping");
                break;
            }
            _ = ticker.tick() => {
                match (controller.rankings(limit), controller.stats()) {
                    (Ok(rankings), Ok(stats)) => {
                        print_stats(&stats);
                        print_rankings(&rankings);
                    }
                    (Err(e), _) | (_, Err(e)) => tracing::warn!("⚠️ Failed to read leaderboard: {}", e),
                }

                if !controller.is_tracking() {
                    match controller.status().stop_reason {
                        Some(StopReason::ChatEnded(detail)) => {
                            tracing::info!("🏁 Live chat ended: {}", detail);
                        }
                        Some(reason) if reason.is_fatal() => {
                            tracing::error!("❌ Tracking stopped: {:?}", reason);
                            fatal = Some(reason);
                        }
                        reason => tracing::info!("🏁 Tracking ended: {:?}", reason),
                    }
                    break;
                }
            }
        }
    }

    controller.shutdown().await?;

    let rankings = controller.rankings(limit)?;
    println!("\nFinal leaderboard");
    print_rankings(&rankings);

    match fatal {
        Some(reason) => anyhow::bail!("tracking {} stopped: {:?}", stream, reason),
        None => Ok(()),
    }
}

fn print_rankings(rankings: &[RankingEntry]) {
    if rankings.is_empty() {
        println!("(no messages counted yet)");
        return;
    }
    for entry in rankings {
        println!("{:>3}. {:<32} {:>6}", entry.rank, entry.username, entry.count);
    }
}

fn print_stats(stats: &ChatStats) {
    println!(
        "total {} / counted {} / filtered {} / active users {}",
        stats.total, stats.counted, stats.filtered, stats.active_users
    );
}

fn print_reset(summary: &ResetSummary) {
    println!(
        "🗑️ Removed {} messages, {} users, {} system entries",
        summary.messages, summary.user_stats, summary.system_info
    );
}
