//! ライブチャット追跡
//!
//! - `session`: 追跡フラグとコーディネーターの状態
//! - `coordinator`: 取得・分類・キュー投入のループ
//! - `controller`: 開始/停止/リセットなど外部向け操作

pub mod controller;
pub mod coordinator;
pub mod session;

pub use controller::{normalize_stream_id, TrackingController, TrackingError, TrackingResult, TrackingStatus};
pub use coordinator::PollingCoordinator;
pub use session::{PollState, SessionState, StopReason, TrackingSession};
