pub mod chat_source; // 配信元の抽象化
pub mod youtube; // YouTube Data API v3 実装

pub use chat_source::{
    AuthError, ChatPage, ChatSource, Cursor, FetchError, RawChatItem, ResolveError, SessionHandle,
};
