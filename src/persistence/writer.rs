use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as TokioMutex};

use super::{QueueItem, WriterCounters};
use crate::database::{ChatDatabase, ChatRecord};

/// 書き込みタスクの終了理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    /// 終了要求を受信
    Shutdown,
    /// 送信側がすべて破棄された
    ChannelClosed,
}

pub(super) async fn run_writer(
    writer_id: u64,
    db: ChatDatabase,
    receiver: Arc<TokioMutex<mpsc::UnboundedReceiver<QueueItem>>>,
    generation: Arc<AtomicU64>,
    counters: Arc<WriterCounters>,
) -> WriterExit {
    // タスクが生きている間は受信側を占有する
    // （終了待ちの旧タスクがいればその終了後に取得できる）
    let mut receiver = receiver.lock().await;
    tracing::debug!("✍️ Writer #{} acquired the persistence queue", writer_id);

    let db = Arc::new(parking_lot::Mutex::new(db));

    loop {
        let Some(item) = receiver.recv().await else {
            tracing::warn!("⚠️ Persistence queue closed");
            return WriterExit::ChannelClosed;
        };

        match item {
            QueueItem::Shutdown { writer_id: target } if target == writer_id => {
                return WriterExit::Shutdown;
            }
            QueueItem::Shutdown { writer_id: target } => {
                tracing::debug!(
                    "🔕 Writer #{} ignored shutdown addressed to #{}",
                    writer_id,
                    target
                );
            }
            QueueItem::Record {
                generation: item_generation,
                record,
            } => {
                if item_generation != generation.load(Ordering::SeqCst) {
                    counters.discarded.fetch_add(1, Ordering::SeqCst);
                    continue;
                }

                match save_blocking(&db, record).await {
                    Ok(()) => {
                        counters.written.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::SeqCst);
                        tracing::error!("❌ Failed to persist message: {}", e);
                    }
                }
            }
            QueueItem::SystemInfo { key, value } => {
                let db = Arc::clone(&db);
                let result = tokio::task::spawn_blocking(move || {
                    db.lock().set_system_info(&key, &value).map_err(|e| (key, e))
                })
                .await;

                match result {
                    Ok(Ok(())) => {}
                    Ok(Err((key, e))) => {
                        tracing::error!("❌ Failed to write system info {}: {}", key, e)
                    }
                    Err(e) => tracing::error!("❌ System info write task failed: {}", e),
                }
            }
        }
    }
}

/// SQLiteへのコミットはブロッキングスレッドで行う
async fn save_blocking(
    db: &Arc<parking_lot::Mutex<ChatDatabase>>,
    record: ChatRecord,
) -> anyhow::Result<()> {
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || {
        db.lock().save_chat_record(&record).map_err(|e| {
            anyhow::anyhow!("message from {}: {}", record.username, e)
        })
    })
    .await??;
    Ok(())
}
