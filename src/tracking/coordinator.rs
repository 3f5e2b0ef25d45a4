//! ポーリングコーディネーター
//!
//! 1セッションにつき1タスクで動作し、配信元からページを取得して分類し、
//! 永続化キューへ積む。状態遷移:
//! `Idle → Resolving → FirstFetchDiscard → Polling → Stopped`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::session::{PollState, StopReason, TrackingSession};
use crate::api::chat_source::{ChatPage, ChatSource, Cursor, FetchError, ResolveError, SessionHandle};
use crate::chat_management::classify;
use crate::config::PollingConfig;
use crate::database::ChatRecord;
use crate::persistence::PersistenceQueue;

/// 1回の取得結果の扱い
enum FetchOutcome {
    Page(ChatPage),
    /// 再試行する（上限未満）
    Retry,
    Stop(StopReason),
}

pub struct PollingCoordinator {
    source: Arc<dyn ChatSource>,
    queue: Arc<PersistenceQueue>,
    session: Arc<TrackingSession>,
    config: PollingConfig,
    shutting_down: Arc<AtomicBool>,
}

impl PollingCoordinator {
    pub fn new(
        source: Arc<dyn ChatSource>,
        queue: Arc<PersistenceQueue>,
        session: Arc<TrackingSession>,
        config: PollingConfig,
        shutting_down: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            queue,
            session,
            config,
            shutting_down,
        }
    }

    /// 停止するまでポーリングを続ける
    pub async fn run(self) -> StopReason {
        let reason = self.poll_until_stopped().await;
        self.session.finish(reason.clone());

        match &reason {
            StopReason::Cancelled => {
                tracing::info!("⏹️ Tracking stopped: {}", self.session.stream_id());
            }
            StopReason::ChatEnded(detail) => {
                tracing::info!(
                    "🏁 Live chat ended for {}: {}",
                    self.session.stream_id(),
                    detail
                );
            }
            other => {
                tracing::error!(
                    "❌ Tracking of {} stopped: {:?}",
                    self.session.stream_id(),
                    other
                );
            }
        }

        if self.shutting_down.load(Ordering::SeqCst) {
            self.queue.retire_writer();
        }

        reason
    }

    async fn poll_until_stopped(&self) -> StopReason {
        let handle = match self.resolve().await {
            Ok(handle) => handle,
            Err(reason) => return reason,
        };

        if let Err(reason) = self.discard_first_page(&handle).await {
            return reason;
        }

        if self
            .session
            .sleep_or_cancel(self.config.first_fetch_settle())
            .await
        {
            return StopReason::Cancelled;
        }

        self.session.update(|s| s.state = PollState::Polling);
        tracing::info!("📡 Polling live chat: {}", self.session.stream_id());

        loop {
            if !self.session.is_tracking() {
                return StopReason::Cancelled;
            }

            let cursor = self.session.cursor();
            let page = match self.fetch(&handle, cursor.as_ref()).await {
                FetchOutcome::Page(page) => page,
                FetchOutcome::Retry => {
                    if self
                        .session
                        .sleep_or_cancel(self.config.error_retry_delay())
                        .await
                    {
                        return StopReason::Cancelled;
                    }
                    continue;
                }
                FetchOutcome::Stop(reason) => return reason,
            };

            if !self.enqueue_page(&page) {
                return StopReason::Cancelled;
            }

            // ページを積み終えてからカーソルを進める
            let Some(next_cursor) = page.next_cursor.clone() else {
                return StopReason::ChatEnded("no continuation cursor".to_string());
            };
            self.session.update(|s| s.cursor = Some(next_cursor));

            if page.offline {
                return StopReason::ChatEnded("chat went offline".to_string());
            }

            let interval = self.config.poll_interval(page.suggested_interval);
            tracing::debug!(
                "⏱️ {} messages, next poll in {:?}",
                page.records.len(),
                interval
            );
            if self.session.sleep_or_cancel(interval).await {
                return StopReason::Cancelled;
            }
        }
    }

    async fn resolve(&self) -> Result<SessionHandle, StopReason> {
        self.session.update(|s| {
            s.state = PollState::Resolving;
            s.cursor = None;
            s.session_handle = None;
        });

        let stream_id = self.session.stream_id().to_string();
        tracing::info!(
            "🔍 Resolving chat session for {} via {}",
            stream_id,
            self.source.source_name()
        );

        match self.source.resolve_session(&stream_id).await {
            Ok(handle) => {
                tracing::info!("✅ Chat session resolved: {}", handle);
                self.session
                    .update(|s| s.session_handle = Some(handle.clone()));
                Ok(handle)
            }
            Err(ResolveError::NotLive) => Err(StopReason::NotLive),
            Err(ResolveError::NotFound) => Err(StopReason::NotFound),
            Err(ResolveError::Transport(e)) => Err(StopReason::ResolveFailed(e)),
        }
    }

    /// 最新ページを取得してカーソルだけを保存する（過去ログは集計しない）
    async fn discard_first_page(&self, handle: &SessionHandle) -> Result<(), StopReason> {
        self.session.update(|s| s.state = PollState::FirstFetchDiscard);

        loop {
            if !self.session.is_tracking() {
                return Err(StopReason::Cancelled);
            }

            match self.fetch(handle, None).await {
                FetchOutcome::Page(page) => {
                    tracing::debug!(
                        "🗑️ Discarded {} backlog messages",
                        page.records.len()
                    );
                    let Some(cursor) = page.next_cursor else {
                        return Err(StopReason::ChatEnded(
                            "no continuation cursor".to_string(),
                        ));
                    };
                    self.session.update(|s| s.cursor = Some(cursor));
                    return Ok(());
                }
                FetchOutcome::Retry => {
                    if self
                        .session
                        .sleep_or_cancel(self.config.error_retry_delay())
                        .await
                    {
                        return Err(StopReason::Cancelled);
                    }
                }
                FetchOutcome::Stop(reason) => return Err(reason),
            }
        }
    }

    async fn fetch(&self, handle: &SessionHandle, cursor: Option<&Cursor>) -> FetchOutcome {
        let result = match tokio::time::timeout(
            self.config.fetch_timeout(),
            self.source.fetch_page(handle, cursor),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Transient(format!(
                "fetch timed out after {:?}",
                self.config.fetch_timeout()
            ))),
        };

        match result {
            Ok(page) => {
                self.session.update(|s| {
                    s.consecutive_errors = 0;
                    s.pages_fetched += 1;
                });
                FetchOutcome::Page(page)
            }
            Err(FetchError::ChatEnded(detail)) => FetchOutcome::Stop(StopReason::ChatEnded(detail)),
            Err(FetchError::Transient(detail)) => {
                let errors = self.session.update(|s| {
                    s.consecutive_errors += 1;
                    s.consecutive_errors
                });

                if errors > self.config.max_consecutive_errors {
                    return FetchOutcome::Stop(StopReason::TooManyErrors(detail));
                }

                tracing::warn!(
                    "⚠️ Fetch failed ({}/{}): {}",
                    errors,
                    self.config.max_consecutive_errors,
                    detail
                );
                FetchOutcome::Retry
            }
        }
    }

    /// ページのメッセージを順に分類して積む
    ///
    /// 途中で停止が要求された場合は`false`を返す。
    fn enqueue_page(&self, page: &ChatPage) -> bool {
        let video_id = self.session.stream_id();

        for item in &page.records {
            if !self.session.is_tracking() {
                return false;
            }

            let class = classify(&item.author, &item.text);
            self.queue.enqueue(ChatRecord::new(
                item.author.clone(),
                item.text.clone(),
                item.timestamp,
                video_id,
                class,
            ));
            self.session.update(|s| s.messages_enqueued += 1);
        }

        true
    }
}
