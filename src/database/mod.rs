pub mod crud;
pub mod models;
pub mod ranking;

pub use models::*;
pub use ranking::RankingService;

use anyhow::Result;
use directories::ProjectDirs;
use rusqlite::OpenFlags;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

/// SQLiteのロック待ち時間
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// 参照用接続のロック待ち時間
const READ_BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// chatrank用データベース接続
///
/// 書き込みタスク・リセット処理・参照クエリはそれぞれ自前の接続を開く。
/// WALモードにより参照は書き込みを待たない。
pub struct ChatDatabase {
    pub connection: rusqlite::Connection,
}

impl ChatDatabase {
    /// データベースを開き、スキーマを初期化
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let connection = rusqlite::Connection::open(db_path)?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        let journal_mode: String =
            connection.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        connection.execute_batch("PRAGMA synchronous=NORMAL;")?;

        let mut db = Self { connection };
        db.initialize_schema()?;

        tracing::debug!("Database opened: {:?} (journal_mode={})", db_path, journal_mode);
        Ok(db)
    }

    /// 既存のデータベースを読み取り専用で開く
    ///
    /// スキーマ作成やジャーナル設定は行わず、ファイルが無ければエラーになる。
    pub fn open_read_only<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let connection = rusqlite::Connection::open_with_flags(
            db_path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        connection.busy_timeout(READ_BUSY_TIMEOUT)?;
        Ok(Self { connection })
    }

    /// インメモリデータベースを作成（テスト用）
    pub fn new_in_memory() -> Result<Self> {
        let connection = rusqlite::Connection::open_in_memory()?;
        let mut db = Self { connection };

        db.initialize_schema()?;
        Ok(db)
    }

    fn initialize_schema(&mut self) -> Result<()> {
        self.connection.execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }
}

/// XDGデータディレクトリからデータベースパスを取得
pub fn get_database_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("dev", "chatrank", "chatrank")
        .ok_or_else(|| anyhow::anyhow!("Failed to get project directories"))?;

    let data_dir = project_dirs.data_dir();
    std::fs::create_dir_all(data_dir)?;

    Ok(data_dir.join("chatrank.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_schema_and_parent_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db_path = dir.path().join("nested").join("chat.db");

        let db = ChatDatabase::open(&db_path)?;
        assert!(db_path.exists());

        let tables: i64 = db.connection.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
             AND name IN ('messages', 'user_stats', 'system_info')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(tables, 3);

        let journal_mode: String =
            db.connection
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        assert_eq!(journal_mode.to_lowercase(), "wal");
        Ok(())
    }

    #[test]
    fn test_open_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db_path = dir.path().join("chat.db");

        ChatDatabase::open(&db_path)?;
        ChatDatabase::open(&db_path)?;
        Ok(())
    }
}
