use serde::{Deserialize, Serialize};

use crate::chat_management::MessageClass;

/// 分類済みチャットメッセージ（書き込みキューの要素）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub username: String,
    pub message: String,
    /// 配信元タイムスタンプ（エポック秒）
    pub timestamp: f64,
    pub video_id: String,
    pub message_class: MessageClass,
}

impl ChatRecord {
    pub fn new(
        username: impl Into<String>,
        message: impl Into<String>,
        timestamp: f64,
        video_id: impl Into<String>,
        message_class: MessageClass,
    ) -> Self {
        Self {
            username: username.into(),
            message: message.into(),
            timestamp,
            video_id: video_id.into(),
            message_class,
        }
    }
}

/// イベントログの1行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub username: String,
    pub message: String,
    pub timestamp: f64,
    pub video_id: Option<String>,
    pub message_class: MessageClass,
    pub created_at: String,
}

/// ユーザー別集計
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStat {
    pub username: String,
    pub message_count: i64,
    pub last_message_time: Option<f64>,
    pub first_seen: String,
    pub updated_at: String,
}

/// ランキングの1行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    pub rank: usize,
    pub username: String,
    pub count: i64,
    pub last_message_time: Option<f64>,
}

/// 集計値
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStats {
    pub total: i64,
    pub filtered: i64,
    pub counted: i64,
    pub active_users: i64,
}

/// リセットで削除された行数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetSummary {
    pub messages: usize,
    pub user_stats: usize,
    pub system_info: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranking_entry_serializes_camel_case() {
        let entry = RankingEntry {
            rank: 1,
            username: "alice".to_string(),
            count: 2,
            last_message_time: Some(1_704_067_200.0),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["rank"], 1);
        assert_eq!(json["username"], "alice");
        assert_eq!(json["count"], 2);
        assert_eq!(json["lastMessageTime"], 1_704_067_200.0);
    }

    #[test]
    fn test_chat_stats_serializes_camel_case() {
        let stats = ChatStats {
            total: 3,
            filtered: 1,
            counted: 2,
            active_users: 1,
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert_eq!(
            json,
            r#"{"total":3,"filtered":1,"counted":2,"activeUsers":1}"#
        );
    }
}
