//! 永続化キューと書き込みタスク
//!
//! 分類済みメッセージを非同期に受け取り、単一の書き込みタスクがSQLiteへ反映する。
//! 受信側はタスク実行中ずっと書き込みタスクが保持するため、同時に動く
//! 書き込みタスクは常に1つだけになる。

mod writer;

pub use writer::WriterExit;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;

use crate::database::{ChatDatabase, ChatRecord};

/// キューの要素
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    /// 分類済みメッセージ（世代が古いものは書き込まずに捨てる）
    Record { generation: u64, record: ChatRecord },
    /// system_infoへのキー/値書き込み
    SystemInfo { key: String, value: String },
    /// 指定した書き込みタスクへの終了要求（他のタスクは読み飛ばす）
    Shutdown { writer_id: u64 },
}

/// 書き込みタスクの停止待ちがタイムアウトした
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("writer did not stop within {0:?}")]
pub struct WriterStopTimeout(pub Duration);

/// 書き込み統計
#[derive(Debug, Default)]
pub struct WriterCounters {
    enqueued: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStatsSnapshot {
    pub enqueued: u64,
    pub written: u64,
    pub failed: u64,
    pub discarded: u64,
}

impl WriterStatsSnapshot {
    /// キューから取り出されて処理が終わった件数
    pub fn processed(&self) -> u64 {
        self.written + self.failed + self.discarded
    }

    pub fn pending(&self) -> u64 {
        self.enqueued.saturating_sub(self.processed())
    }
}

impl WriterCounters {
    pub fn snapshot(&self) -> WriterStatsSnapshot {
        WriterStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::SeqCst),
            written: self.written.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
        }
    }
}

/// 起動中の書き込みタスク
struct WriterSlot {
    id: u64,
    handle: JoinHandle<WriterExit>,
    /// 終了要求を送信済み
    retiring: bool,
}

impl WriterSlot {
    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// 永続化キュー
pub struct PersistenceQueue {
    db_path: PathBuf,
    sender: mpsc::UnboundedSender<QueueItem>,
    receiver: Arc<TokioMutex<mpsc::UnboundedReceiver<QueueItem>>>,
    generation: Arc<AtomicU64>,
    counters: Arc<WriterCounters>,
    next_writer_id: AtomicU64,
    writer: parking_lot::Mutex<Option<WriterSlot>>,
}

impl PersistenceQueue {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            db_path: db_path.into(),
            sender,
            receiver: Arc::new(TokioMutex::new(receiver)),
            generation: Arc::new(AtomicU64::new(0)),
            counters: Arc::new(WriterCounters::default()),
            next_writer_id: AtomicU64::new(1),
            writer: parking_lot::Mutex::new(None),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// メッセージを追加（ブロックしない）
    pub fn enqueue(&self, record: ChatRecord) {
        let generation = self.generation.load(Ordering::SeqCst);
        self.counters.enqueued.fetch_add(1, Ordering::SeqCst);
        self.send(QueueItem::Record { generation, record });
    }

    pub fn enqueue_system_info(&self, key: impl Into<String>, value: impl Into<String>) {
        self.send(QueueItem::SystemInfo {
            key: key.into(),
            value: value.into(),
        });
    }

    fn send(&self, item: QueueItem) {
        // 受信側は自身が保持しているため送信は失敗しない
        if let Err(e) = self.sender.send(item) {
            tracing::error!("❌ Persistence queue closed, dropping item: {:?}", e.0);
        }
    }

    /// 現在キューにある過去セッションのメッセージを書き込まずに捨てる
    pub fn discard_pending(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!("🧹 Queue generation advanced to {}", generation);
        generation
    }

    pub fn stats(&self) -> WriterStatsSnapshot {
        self.counters.snapshot()
    }

    pub fn is_writer_running(&self) -> bool {
        self.writer
            .lock()
            .as_ref()
            .map(|slot| !slot.is_finished())
            .unwrap_or(false)
    }

    /// 書き込みタスクを起動（起動済みなら何もしない）
    ///
    /// 新しく起動した場合は`true`を返す。終了要求済みのタスクがまだ動いている
    /// 場合も新しいタスクを起動し、新しいタスクは旧タスクの終了後に受信を始める。
    pub fn ensure_writer(&self) -> anyhow::Result<bool> {
        let mut slot = self.writer.lock();
        if let Some(current) = slot.as_ref() {
            if !current.is_finished() && !current.retiring {
                return Ok(false);
            }
            if !current.is_finished() {
                tracing::info!(
                    "🔁 Writer #{} is still retiring, starting a successor",
                    current.id
                );
            }
        }

        let db = ChatDatabase::open(&self.db_path)?;
        let id = self.next_writer_id.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(writer::run_writer(
            id,
            db,
            Arc::clone(&self.receiver),
            Arc::clone(&self.generation),
            Arc::clone(&self.counters),
        ));
        *slot = Some(WriterSlot {
            id,
            handle,
            retiring: false,
        });

        tracing::info!(
            "✍️ Persistence writer #{} started: {}",
            id,
            self.db_path.display()
        );
        Ok(true)
    }

    /// 終了要求を送り、書き込みタスクの終了を待つ
    ///
    /// 終了要求より前にキューにあった要素は書き込まれてから終了する。
    pub async fn stop_writer(&self, timeout: Duration) -> Result<(), WriterStopTimeout> {
        let slot = self.writer.lock().take();
        let Some(mut slot) = slot else {
            return Ok(());
        };
        if slot.is_finished() {
            return Ok(());
        }

        if !slot.retiring {
            self.send(QueueItem::Shutdown { writer_id: slot.id });
            slot.retiring = true;
        }

        match tokio::time::timeout(timeout, &mut slot.handle).await {
            Ok(Ok(exit)) => {
                tracing::info!("⏹️ Persistence writer stopped ({:?})", exit);
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!("❌ Persistence writer task failed: {}", e);
                Ok(())
            }
            Err(_) => {
                tracing::warn!("⏳ Persistence writer still running after {:?}", timeout);
                let mut current = self.writer.lock();
                // 待機中に後継が起動していなければ戻す
                if current.is_none() {
                    *current = Some(slot);
                }
                Err(WriterStopTimeout(timeout))
            }
        }
    }

    /// 終了要求だけを送る（プロセス終了時）
    pub fn retire_writer(&self) {
        let mut slot = self.writer.lock();
        if let Some(current) = slot.as_mut() {
            if !current.is_finished() && !current.retiring {
                self.send(QueueItem::Shutdown {
                    writer_id: current.id,
                });
                current.retiring = true;
            }
        }
    }

    /// 書き込みタスク停止中に残った要素をすべて捨てる
    ///
    /// 書き込みタスクが動いている間は何もしない。
    pub fn drain(&self) -> usize {
        let Ok(mut receiver) = self.receiver.try_lock() else {
            tracing::warn!("⚠️ Cannot drain queue while the writer is running");
            return 0;
        };

        let mut drained = 0;
        while let Ok(item) = receiver.try_recv() {
            if matches!(item, QueueItem::Record { .. }) {
                self.counters.discarded.fetch_add(1, Ordering::SeqCst);
            }
            drained += 1;
        }

        if drained > 0 {
            tracing::info!("🧹 Drained {} queued items", drained);
        }
        drained
    }
}
