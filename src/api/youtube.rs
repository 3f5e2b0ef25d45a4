use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

use super::chat_source::{
    AuthError, ChatPage, ChatSource, Cursor, FetchError, RawChatItem, ResolveError, SessionHandle,
    DEFAULT_POLLING_INTERVAL_MS,
};

pub const YOUTUBE_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// `liveChatMessages.list` page size
const MAX_RESULTS: &str = "200";

/// Error reasons that mean the chat is gone for good.
const CHAT_ENDED_REASONS: &[&str] = &["liveChatEnded", "liveChatDisabled", "liveChatNotFound"];

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Failed to parse JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("API returned status {status}: {message}")]
    Status {
        status: u16,
        reason: Option<String>,
        message: String,
    },
}

impl ApiError {
    pub fn reason(&self) -> Option<&str> {
        match self {
            ApiError::Status { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }

    fn is_chat_ended(&self) -> bool {
        self.reason()
            .map(|reason| CHAT_ENDED_REASONS.contains(&reason))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub struct VideoId(pub String);

#[derive(Debug, Clone, derive_more::Display)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    /// Key prefix that is safe to log
    pub fn masked(&self) -> String {
        format!("{}...", self.0.chars().take(10).collect::<String>())
    }
}

fn video_id_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"^([A-Za-z0-9_-]{11})$",
            r"[?&]v=([A-Za-z0-9_-]{11})",
            r"youtu\.be/([A-Za-z0-9_-]{11})",
            r"youtube\.com/(?:live|shorts|embed)/([A-Za-z0-9_-]{11})",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

/// Extract a video id from a bare id or any of the usual watch URL shapes.
pub fn extract_video_id(input: &str) -> Option<VideoId> {
    let input = input.trim();
    video_id_patterns()
        .iter()
        .find_map(|re| re.captures(input))
        .and_then(|cap| cap.get(1))
        .map(|m| VideoId(m.as_str().to_string()))
}

/// Parse an RFC 3339 `publishedAt` value into epoch seconds.
///
/// Falls back to the current time when the value cannot be parsed.
pub fn parse_timestamp(published: &str) -> f64 {
    match chrono::DateTime::parse_from_rfc3339(published) {
        Ok(dt) => dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_micros()) / 1_000_000.0,
        Err(e) => {
            tracing::debug!("⚠️ Unparsable publishedAt '{}': {}", published, e);
            now_epoch_seconds()
        }
    }
}

pub fn now_epoch_seconds() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    #[serde(default)]
    snippet: Option<VideoSnippet>,
    #[serde(default)]
    live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveStreamingDetails {
    #[serde(default)]
    active_live_chat_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatMessageListResponse {
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub polling_interval_millis: Option<u64>,
    #[serde(default)]
    pub offline_at: Option<String>,
    #[serde(default)]
    pub items: Vec<LiveChatMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatMessage {
    #[serde(default)]
    pub snippet: LiveChatMessageSnippet,
    #[serde(default)]
    pub author_details: AuthorDetails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatMessageSnippet {
    #[serde(default)]
    pub display_message: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorDetails {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: ApiErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorItem>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorItem {
    #[serde(default)]
    reason: Option<String>,
}

impl From<LiveChatMessageListResponse> for ChatPage {
    fn from(response: LiveChatMessageListResponse) -> Self {
        let records = response
            .items
            .into_iter()
            .map(|item| RawChatItem {
                author: item
                    .author_details
                    .display_name
                    .unwrap_or_else(|| "Unknown".to_string()),
                text: item.snippet.display_message.unwrap_or_default(),
                timestamp: item
                    .snippet
                    .published_at
                    .as_deref()
                    .map(parse_timestamp)
                    .unwrap_or_else(now_epoch_seconds),
            })
            .collect();

        ChatPage {
            records,
            next_cursor: response.next_page_token.map(Cursor),
            suggested_interval: Duration::from_millis(
                response
                    .polling_interval_millis
                    .unwrap_or(DEFAULT_POLLING_INTERVAL_MS),
            ),
            offline: response.offline_at.is_some(),
        }
    }
}

fn parse_error_body(status: u16, body: &str) -> ApiError {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
    let reason = parsed
        .error
        .errors
        .into_iter()
        .find_map(|item| item.reason);
    let message = if parsed.error.message.is_empty() {
        body.chars().take(200).collect()
    } else {
        parsed.error.message
    };

    ApiError::Status {
        status,
        reason,
        message,
    }
}

/// YouTube Data API v3 client for live chat.
#[derive(Debug, Clone)]
pub struct YoutubeDataApi {
    api_key: ApiKey,
    http_client: reqwest::Client,
    request_timeout: Duration,
}

impl YoutubeDataApi {
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            api_key,
            http_client: reqwest::Client::new(),
            request_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        resource: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = format!("{}/{}", YOUTUBE_API_BASE_URL, resource);

        tracing::debug!("📡 GET {} {:?}", url, query);

        let response = self
            .http_client
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.0.as_str())])
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let error = parse_error_body(status.as_u16(), &body);
            tracing::warn!("❌ {} request failed: {}", resource, error);
            return Err(error);
        }

        Ok(serde_json::from_str(&body)?)
    }

    pub async fn fetch_live_chat_id(&self, video_id: &VideoId) -> Result<SessionHandle, ResolveError> {
        let response: VideoListResponse = self
            .get_json(
                "videos",
                &[("part", "liveStreamingDetails,snippet"), ("id", video_id.0.as_str())],
            )
            .await
            .map_err(|e| ResolveError::Transport(e.to_string()))?;

        let item = response.items.into_iter().next().ok_or_else(|| {
            tracing::warn!("❌ Video not found: {}", video_id);
            ResolveError::NotFound
        })?;

        let details = item.live_streaming_details.ok_or_else(|| {
            tracing::warn!("❌ {} is not a live stream", video_id);
            ResolveError::NotLive
        })?;

        let chat_id = details.active_live_chat_id.ok_or_else(|| {
            tracing::warn!("❌ {} has no active live chat", video_id);
            ResolveError::NotLive
        })?;

        let title = item
            .snippet
            .map(|s| s.title)
            .unwrap_or_else(|| "Unknown".to_string());
        tracing::info!("✅ Live chat found: {}", title);

        Ok(SessionHandle(chat_id))
    }

    pub async fn fetch_chat_messages(
        &self,
        live_chat_id: &SessionHandle,
        page_token: Option<&Cursor>,
    ) -> Result<LiveChatMessageListResponse, ApiError> {
        let mut query = vec![
            ("liveChatId", live_chat_id.0.as_str()),
            ("part", "snippet,authorDetails"),
            ("maxResults", MAX_RESULTS),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.0.as_str()));
        }

        self.get_json("liveChat/messages", &query).await
    }
}

#[async_trait]
impl ChatSource for YoutubeDataApi {
    async fn authenticate(&self) -> Result<(), AuthError> {
        tracing::info!("🔑 Validating API key {}", self.api_key.masked());

        let result: Result<VideoListResponse, ApiError> = self
            .get_json(
                "videos",
                &[("part", "snippet"), ("chart", "mostPopular"), ("maxResults", "1")],
            )
            .await;

        match result {
            Ok(_) => {
                tracing::info!("✅ YouTube API key accepted");
                Ok(())
            }
            Err(ApiError::Status {
                status: 400 | 401 | 403,
                message,
                ..
            }) => Err(AuthError::InvalidKey(message)),
            Err(e) => Err(AuthError::Transport(e.to_string())),
        }
    }

    async fn resolve_session(&self, stream_id: &str) -> Result<SessionHandle, ResolveError> {
        let video_id = extract_video_id(stream_id).ok_or(ResolveError::NotFound)?;
        self.fetch_live_chat_id(&video_id).await
    }

    async fn fetch_page(
        &self,
        session: &SessionHandle,
        cursor: Option<&Cursor>,
    ) -> Result<ChatPage, FetchError> {
        match self.fetch_chat_messages(session, cursor).await {
            Ok(response) => Ok(response.into()),
            Err(e) if e.is_chat_ended() => Err(FetchError::ChatEnded(e.to_string())),
            Err(e) => Err(FetchError::Transient(e.to_string())),
        }
    }

    fn source_name(&self) -> &'static str {
        "youtube-data-api-v3"
    }
}
