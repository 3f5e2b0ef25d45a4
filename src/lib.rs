pub mod api;
pub mod chat_management;
pub mod config;
pub mod database;
pub mod logging;
pub mod persistence;
pub mod tracking;

// Re-export the main error types for convenience
pub use api::{AuthError, FetchError, ResolveError};
pub use tracking::{TrackingError, TrackingResult};

pub use api::ChatSource;
pub use chat_management::{classify, MessageClass};
pub use config::{AppConfig, ConfigManager};
pub use database::{ChatDatabase, ChatRecord, ChatStats, RankingEntry, RankingService, ResetSummary};
pub use persistence::PersistenceQueue;
pub use tracking::{TrackingController, TrackingStatus};
