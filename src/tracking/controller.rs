//! 追跡コントローラー
//!
//! 外部から呼ばれる操作（認証・開始・停止・リセット・参照）の窓口。
//! コーディネーターと書き込みタスクのライフサイクルをここで管理する。

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;

use super::coordinator::PollingCoordinator;
use super::session::{PollState, StopReason, TrackingSession};
use crate::api::chat_source::ChatSource;
use crate::api::youtube::{extract_video_id, now_epoch_seconds};
use crate::config::ControllerConfig;
use crate::database::{ChatDatabase, ChatStats, RankingEntry, RankingService, ResetSummary};
use crate::persistence::PersistenceQueue;

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Already tracking a stream")]
    AlreadyTracking,
    #[error("Cannot reset while tracking is active")]
    TrackingActive,
    #[error("Previous session is still stopping, try again")]
    StillStopping,
    #[error("Invalid stream id: '{0}'")]
    InvalidStream(String),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
    #[error("Controller is shutting down")]
    ShuttingDown,
}

pub type TrackingResult<T> = Result<T, TrackingError>;

/// 現在の追跡状態
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStatus {
    pub authenticated: bool,
    pub tracking: bool,
    pub stream_id: Option<String>,
    pub state: PollState,
    pub consecutive_errors: u32,
    pub pages_fetched: u64,
    pub messages_enqueued: u64,
    pub stop_reason: Option<StopReason>,
    pub writer_running: bool,
}

/// 入力（動画IDまたはURL）から記録用の配信IDを得る
pub fn normalize_stream_id(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    Some(
        extract_video_id(input)
            .map(|id| id.0)
            .unwrap_or_else(|| input.to_string()),
    )
}

pub struct TrackingController {
    source: Arc<dyn ChatSource>,
    queue: Arc<PersistenceQueue>,
    rankings: RankingService,
    config: ControllerConfig,
    authenticated: AtomicBool,
    shutting_down: Arc<AtomicBool>,
    lifecycle: TokioMutex<Option<JoinHandle<StopReason>>>,
    session: parking_lot::RwLock<Option<Arc<TrackingSession>>>,
}

impl TrackingController {
    pub fn new(
        source: Arc<dyn ChatSource>,
        db_path: impl Into<PathBuf>,
        config: ControllerConfig,
    ) -> Self {
        let db_path = db_path.into();
        Self {
            source,
            queue: Arc::new(PersistenceQueue::new(db_path.clone())),
            rankings: RankingService::new(db_path),
            config,
            authenticated: AtomicBool::new(false),
            shutting_down: Arc::new(AtomicBool::new(false)),
            lifecycle: TokioMutex::new(None),
            session: parking_lot::RwLock::new(None),
        }
    }

    pub fn db_path(&self) -> &Path {
        self.queue.db_path()
    }

    pub fn queue(&self) -> &Arc<PersistenceQueue> {
        &self.queue
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn is_tracking(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .map(|session| session.is_tracking())
            .unwrap_or(false)
    }

    /// 配信元の認証情報を検証する
    pub async fn authenticate(&self) -> TrackingResult<()> {
        match self.source.authenticate().await {
            Ok(()) => {
                self.authenticated.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.authenticated.store(false, Ordering::SeqCst);
                tracing::error!("❌ Authentication failed: {}", e);
                Err(TrackingError::Authentication(e.to_string()))
            }
        }
    }

    /// 追跡を開始する（ポーリングはバックグラウンドで進む）
    pub async fn start(&self, stream_id: &str) -> TrackingResult<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(TrackingError::ShuttingDown);
        }
        if !self.is_authenticated() {
            return Err(TrackingError::NotAuthenticated);
        }
        let stream_id = normalize_stream_id(stream_id)
            .ok_or_else(|| TrackingError::InvalidStream(stream_id.to_string()))?;

        let mut lifecycle = self.lifecycle.lock().await;
        if self.is_tracking() {
            return Err(TrackingError::AlreadyTracking);
        }
        if let Some(handle) = lifecycle.as_ref() {
            if !handle.is_finished() {
                return Err(TrackingError::AlreadyTracking);
            }
        }

        // 前回セッションの未書き込みメッセージは集計しない
        self.queue.discard_pending();
        self.queue.ensure_writer()?;

        self.queue.enqueue_system_info("last_stream_id", stream_id.clone());
        self.queue
            .enqueue_system_info("tracking_started_at", now_epoch_seconds().to_string());

        let session = Arc::new(TrackingSession::new(stream_id.clone()));
        let coordinator = PollingCoordinator::new(
            Arc::clone(&self.source),
            Arc::clone(&self.queue),
            Arc::clone(&session),
            self.config.polling.clone(),
            Arc::clone(&self.shutting_down),
        );

        *self.session.write() = Some(session);
        *lifecycle = Some(tokio::spawn(coordinator.run()));

        tracing::info!("🚀 Tracking started: {}", stream_id);
        Ok(())
    }

    /// 追跡を停止し、コーディネーターの終了を待つ
    ///
    /// 待機がタイムアウトした場合は`StillStopping`を返す。再度呼べば続きを待つ。
    pub async fn stop(&self) -> TrackingResult<Option<StopReason>> {
        if let Some(session) = self.session.read().as_ref() {
            session.request_stop();
        }

        let mut lifecycle = self.lifecycle.lock().await;
        let Some(handle) = lifecycle.as_mut() else {
            return Ok(None);
        };

        match tokio::time::timeout(self.config.stop_timeout(), handle).await {
            Ok(result) => {
                *lifecycle = None;
                match result {
                    Ok(reason) => Ok(Some(reason)),
                    Err(e) => {
                        tracing::error!("❌ Polling task failed: {}", e);
                        Ok(None)
                    }
                }
            }
            Err(_) => {
                tracing::warn!(
                    "⏳ Polling task did not stop within {:?}",
                    self.config.stop_timeout()
                );
                Err(TrackingError::StillStopping)
            }
        }
    }

    /// 全データを削除する
    ///
    /// 書き込みタスクを止めてからキューを捨て、削除後に書き込みタスクを再起動する。
    pub async fn reset(&self) -> TrackingResult<ResetSummary> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.is_tracking() {
            return Err(TrackingError::TrackingActive);
        }
        if let Some(handle) = lifecycle.as_ref() {
            if !handle.is_finished() {
                return Err(TrackingError::StillStopping);
            }
        }
        *lifecycle = None;

        if let Err(e) = self
            .queue
            .stop_writer(self.config.writer_stop_timeout())
            .await
        {
            tracing::warn!("⚠️ Reset aborted: {}", e);
            return Err(TrackingError::StillStopping);
        }

        self.queue.drain();
        self.queue.discard_pending();
        *self.session.write() = None;

        let db_path = self.queue.db_path().to_path_buf();
        let result = tokio::task::spawn_blocking(move || -> anyhow::Result<ResetSummary> {
            let mut db = ChatDatabase::open(&db_path)?;
            db.reset_all()
        })
        .await
        .map_err(anyhow::Error::from)
        .and_then(|result| result);

        // 削除に失敗しても書き込みタスクは戻す
        self.queue.ensure_writer()?;

        Ok(result?)
    }

    pub fn rankings(&self, limit: usize) -> TrackingResult<Vec<RankingEntry>> {
        Ok(self.rankings.top_n(limit)?)
    }

    pub fn stats(&self) -> TrackingResult<ChatStats> {
        Ok(self.rankings.stats()?)
    }

    pub fn status(&self) -> TrackingStatus {
        let session = self.session.read().clone();
        let (stream_id, snapshot, tracking) = match session {
            Some(session) => (
                Some(session.stream_id().to_string()),
                session.snapshot(),
                session.is_tracking(),
            ),
            None => (None, Default::default(), false),
        };

        TrackingStatus {
            authenticated: self.is_authenticated(),
            tracking,
            stream_id,
            state: snapshot.state,
            consecutive_errors: snapshot.consecutive_errors,
            pages_fetched: snapshot.pages_fetched,
            messages_enqueued: snapshot.messages_enqueued,
            stop_reason: snapshot.stop_reason,
            writer_running: self.queue.is_writer_running(),
        }
    }

    /// プロセス終了時の後始末
    ///
    /// 追跡を止め、キューに残ったメッセージを書き込んでから書き込みタスクを終える。
    pub async fn shutdown(&self) -> TrackingResult<()> {
        self.shutting_down.store(true, Ordering::SeqCst);

        if let Err(e) = self.stop().await {
            tracing::warn!("⚠️ Shutdown while polling task is still running: {}", e);
        }

        if let Err(e) = self
            .queue
            .stop_writer(self.config.writer_stop_timeout())
            .await
        {
            tracing::warn!("⚠️ {}", e);
            self.queue.retire_writer();
        }

        tracing::info!("👋 Tracking controller shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_stream_id() {
        assert_eq!(
            normalize_stream_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            normalize_stream_id("  dQw4w9WgXcQ ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(normalize_stream_id("custom-stream").as_deref(), Some("custom-stream"));
        assert_eq!(normalize_stream_id("   "), None);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            TrackingError::AlreadyTracking.to_string(),
            "Already tracking a stream"
        );
        assert_eq!(
            TrackingError::InvalidStream("".to_string()).to_string(),
            "Invalid stream id: ''"
        );
    }
}
