//! 追跡セッションの共有状態

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use crate::api::chat_source::{Cursor, SessionHandle};

/// ポーリングの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PollState {
    Idle,
    Resolving,
    FirstFetchDiscard,
    Polling,
    Stopped,
}

/// 追跡が終了した理由
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// 停止要求
    Cancelled,
    /// 配信がライブでない
    NotLive,
    /// 配信が見つからない
    NotFound,
    /// セッション解決の通信エラー
    ResolveFailed(String),
    /// 連続エラーの上限超過
    TooManyErrors(String),
    /// チャット終了
    ChatEnded(String),
}

impl StopReason {
    /// 利用者の操作以外で終了したか
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StopReason::Cancelled)
    }
}

/// コーディネーターだけが書き換える可変状態
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub state: PollState,
    pub session_handle: Option<SessionHandle>,
    pub cursor: Option<Cursor>,
    pub consecutive_errors: u32,
    pub pages_fetched: u64,
    pub messages_enqueued: u64,
    pub stop_reason: Option<StopReason>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            state: PollState::Idle,
            session_handle: None,
            cursor: None,
            consecutive_errors: 0,
            pages_fetched: 0,
            messages_enqueued: 0,
            stop_reason: None,
        }
    }
}

/// 1回の追跡セッション
///
/// 追跡フラグはどのタスクからでも読み書きできる。停止要求はフラグを落として
/// 待機中のコーディネーターを起こす。
#[derive(Debug)]
pub struct TrackingSession {
    stream_id: String,
    tracking: AtomicBool,
    wake: Notify,
    inner: parking_lot::Mutex<SessionState>,
}

impl TrackingSession {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracking: AtomicBool::new(true),
            wake: Notify::new(),
            inner: parking_lot::Mutex::new(SessionState::default()),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::SeqCst)
    }

    /// 停止を要求する
    pub fn request_stop(&self) {
        self.tracking.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// 停止要求で中断できる待機
    ///
    /// 待機中に停止が要求された場合は`true`を返す。
    pub async fn sleep_or_cancel(&self, duration: Duration) -> bool {
        if !self.is_tracking() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_tracking(),
            _ = self.wake.notified() => true,
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.lock().clone()
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.inner.lock().cursor.clone()
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// 終了状態へ遷移してフラグを落とす
    pub(crate) fn finish(&self, reason: StopReason) {
        self.tracking.store(false, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        inner.state = PollState::Stopped;
        inner.stop_reason = Some(reason);
    }
}
