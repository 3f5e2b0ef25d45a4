//! ランキング参照
//!
//! 読み取り専用。書き込みタスクやポーリングとは独立した接続で問い合わせる。

use anyhow::Result;
use rusqlite::params;
use std::path::{Path, PathBuf};

use super::{ChatDatabase, ChatStats, RankingEntry};

impl ChatDatabase {
    /// 上位ユーザーを取得（件数降順、同数なら最終発言が新しい順）
    pub fn top_rankings(&self, limit: usize) -> Result<Vec<RankingEntry>> {
        let mut stmt = self.connection.prepare(
            "SELECT username, message_count, last_message_time
             FROM user_stats
             WHERE message_count > 0
             ORDER BY message_count DESC, last_message_time DESC, username ASC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<f64>>(2)?,
            ))
        })?;

        let mut rankings = Vec::new();
        for (index, row) in rows.enumerate() {
            let (username, count, last_message_time) = row?;
            rankings.push(RankingEntry {
                rank: index + 1,
                username,
                count,
                last_message_time,
            });
        }

        Ok(rankings)
    }

    pub fn chat_stats(&self) -> Result<ChatStats> {
        let stats = self.connection.query_row(
            "SELECT
                 (SELECT COUNT(*) FROM messages),
                 (SELECT COUNT(*) FROM messages WHERE message_type = 'filtered'),
                 (SELECT COUNT(*) FROM messages WHERE message_type = 'counted'),
                 (SELECT COUNT(*) FROM user_stats WHERE message_count > 0)",
            [],
            |row| {
                Ok(ChatStats {
                    total: row.get(0)?,
                    filtered: row.get(1)?,
                    counted: row.get(2)?,
                    active_users: row.get(3)?,
                })
            },
        )?;
        Ok(stats)
    }
}

/// ランキング参照サービス
///
/// 呼び出しごとに読み取り専用の接続を開くため、どのタスクからでも並行して使える。
/// データベースがまだ作られていなければ空の結果を返し、ファイルは作らない。
#[derive(Debug, Clone)]
pub struct RankingService {
    db_path: PathBuf,
}

impl RankingService {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn top_n(&self, limit: usize) -> Result<Vec<RankingEntry>> {
        match self.connect()? {
            Some(db) => db.top_rankings(limit),
            None => Ok(Vec::new()),
        }
    }

    pub fn stats(&self) -> Result<ChatStats> {
        match self.connect()? {
            Some(db) => db.chat_stats(),
            None => Ok(ChatStats::default()),
        }
    }

    fn connect(&self) -> Result<Option<ChatDatabase>> {
        if !self.db_path.exists() {
            tracing::debug!("📭 No database at {:?} yet", self.db_path);
            return Ok(None);
        }
        ChatDatabase::open_read_only(&self.db_path).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_management::MessageClass;
    use crate::database::ChatRecord;

    fn save(db: &mut ChatDatabase, username: &str, timestamp: f64, class: MessageClass) {
        db.save_chat_record(&ChatRecord::new(username, "msg", timestamp, "video", class))
            .unwrap();
    }

    #[test]
    fn test_top_rankings_ordering_and_tie_break() -> Result<()> {
        let mut db = ChatDatabase::new_in_memory()?;

        save(&mut db, "alice", 10.0, MessageClass::Counted);
        save(&mut db, "alice", 20.0, MessageClass::Counted);
        save(&mut db, "bob", 15.0, MessageClass::Counted);
        save(&mut db, "carol", 30.0, MessageClass::Counted);
        save(&mut db, "dave", 30.0, MessageClass::Counted);

        let rankings = db.top_rankings(10)?;
        let order: Vec<(&str, usize, i64)> = rankings
            .iter()
            .map(|r| (r.username.as_str(), r.rank, r.count))
            .collect();

        // 同数の場合は最終発言が新しい順、同時刻ならユーザー名順
        assert_eq!(
            order,
            vec![
                ("alice", 1, 2),
                ("carol", 2, 1),
                ("dave", 3, 1),
                ("bob", 4, 1),
            ]
        );
        assert_eq!(rankings[0].last_message_time, Some(20.0));
        Ok(())
    }

    #[test]
    fn test_top_rankings_respects_limit() -> Result<()> {
        let mut db = ChatDatabase::new_in_memory()?;
        for i in 0..8 {
            save(&mut db, &format!("user{}", i), i as f64, MessageClass::Counted);
        }

        let rankings = db.top_rankings(5)?;
        assert_eq!(rankings.len(), 5);
        assert_eq!(rankings[0].username, "user7");
        assert_eq!(rankings[4].rank, 5);
        Ok(())
    }

    #[test]
    fn test_chat_stats() -> Result<()> {
        let mut db = ChatDatabase::new_in_memory()?;

        assert_eq!(db.chat_stats()?, ChatStats::default());

        save(&mut db, "alice", 1.0, MessageClass::Counted);
        save(&mut db, "alice", 2.0, MessageClass::Counted);
        save(&mut db, "bob", 3.0, MessageClass::Filtered);

        assert_eq!(
            db.chat_stats()?,
            ChatStats {
                total: 3,
                filtered: 1,
                counted: 2,
                active_users: 1,
            }
        );
        Ok(())
    }

    #[test]
    fn test_ranking_service_reads_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db_path = dir.path().join("chat.db");

        let mut db = ChatDatabase::open(&db_path)?;
        save(&mut db, "alice", 1.0, MessageClass::Counted);

        let service = RankingService::new(&db_path);
        assert_eq!(service.db_path(), db_path.as_path());
        assert_eq!(service.top_n(5)?.len(), 1);
        assert_eq!(service.stats()?.counted, 1);
        Ok(())
    }

    #[test]
    fn test_ranking_service_does_not_create_missing_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db_path = dir.path().join("missing").join("chat.db");

        let service = RankingService::new(&db_path);
        assert!(service.top_n(5)?.is_empty());
        assert_eq!(service.stats()?, ChatStats::default());
        assert!(!db_path.exists());
        assert!(!dir.path().join("missing").exists());
        Ok(())
    }

    #[test]
    fn test_read_only_connection_rejects_writes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db_path = dir.path().join("chat.db");

        let mut db = ChatDatabase::open(&db_path)?;
        save(&mut db, "alice", 1.0, MessageClass::Counted);

        let reader = ChatDatabase::open_read_only(&db_path)?;
        assert_eq!(reader.top_rankings(5)?.len(), 1);
        assert!(reader
            .connection
            .execute("DELETE FROM user_stats", [])
            .is_err());
        assert_eq!(db.top_rankings(5)?.len(), 1);
        Ok(())
    }
}
