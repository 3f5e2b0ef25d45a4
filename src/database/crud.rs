use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{ChatDatabase, ChatRecord, ResetSummary, StoredMessage, UserStat};
use crate::chat_management::MessageClass;

impl ChatDatabase {
    /// メッセージを保存し、Countedならユーザー集計を更新する
    ///
    /// 2つの書き込みは1トランザクションでコミットされる。
    pub fn save_chat_record(&mut self, record: &ChatRecord) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let tx = self.connection.transaction()?;

        tx.execute(
            "INSERT INTO messages (username, message, timestamp, video_id, message_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.username,
                record.message,
                record.timestamp,
                record.video_id,
                record.message_class.as_str(),
                now,
            ],
        )?;
        let message_id = tx.last_insert_rowid();

        if record.message_class.is_counted() {
            tx.execute(
                "INSERT INTO user_stats (username, message_count, last_message_time, first_seen, updated_at)
                 VALUES (?1, 1, ?2, ?3, ?3)
                 ON CONFLICT(username) DO UPDATE SET
                     message_count = message_count + 1,
                     last_message_time = excluded.last_message_time,
                     updated_at = excluded.updated_at",
                params![record.username, record.timestamp, now],
            )?;
        }

        tx.commit()?;
        Ok(message_id)
    }

    /// 全データを削除してファイルを最適化
    pub fn reset_all(&mut self) -> Result<ResetSummary> {
        let tx = self.connection.transaction()?;
        let summary = ResetSummary {
            messages: tx.execute("DELETE FROM messages", [])?,
            user_stats: tx.execute("DELETE FROM user_stats", [])?,
            system_info: tx.execute("DELETE FROM system_info", [])?,
        };
        tx.commit()?;

        self.connection.execute_batch("VACUUM;")?;

        tracing::info!(
            "🗑️ Database reset: {} messages, {} users, {} system entries removed",
            summary.messages,
            summary.user_stats,
            summary.system_info
        );
        Ok(summary)
    }

    pub fn set_system_info(&mut self, key: &str, value: &str) -> Result<()> {
        self.connection.execute(
            "INSERT INTO system_info (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_system_info(&self, key: &str) -> Result<Option<String>> {
        let value: Option<Option<String>> = self
            .connection
            .query_row(
                "SELECT value FROM system_info WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    pub fn get_user_stat(&self, username: &str) -> Result<Option<UserStat>> {
        let stat = self
            .connection
            .query_row(
                "SELECT username, message_count, last_message_time, first_seen, updated_at
                 FROM user_stats WHERE username = ?1",
                params![username],
                |row| {
                    Ok(UserStat {
                        username: row.get(0)?,
                        message_count: row.get(1)?,
                        last_message_time: row.get(2)?,
                        first_seen: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(stat)
    }

    /// イベントログを到着順に取得
    pub fn get_recent_messages(&self, limit: usize) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.connection.prepare(
            "SELECT id, username, message, timestamp, video_id, message_type, created_at
             FROM messages ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_stored_message)?;

        let mut messages = Vec::new();
        for message in rows {
            messages.push(message?);
        }
        messages.reverse();

        Ok(messages)
    }

    fn row_to_stored_message(row: &Row) -> rusqlite::Result<StoredMessage> {
        let message_type: String = row.get(5)?;
        Ok(StoredMessage {
            id: row.get(0)?,
            username: row.get(1)?,
            message: row.get(2)?,
            timestamp: row.get(3)?,
            video_id: row.get(4)?,
            message_class: MessageClass::from_db(&message_type).unwrap_or(MessageClass::Filtered),
            created_at: row.get(6)?,
        })
    }
}
