//! Queue persistence: the store trait and its memory and file backends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;

use peerdrop_protocol::TransferStatus;
use peerdrop_store::{BoxFuture, JsonMapFile, StoreError};

use crate::TransferQueueEntry;

const QUEUE_FILE: &str = "queue.json";

/// Queue entry persistence keyed by transfer id.
///
/// Listing methods return entries in scheduling order, ascending
/// `(priority, sequence)`.
pub trait QueueStore: Send + Sync {
    fn get<'a>(
        &'a self,
        transfer_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<TransferQueueEntry>, StoreError>>;

    /// Inserts or replaces an entry.
    fn save<'a>(&'a self, entry: &'a TransferQueueEntry) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Removes an entry. Returns `false` if none existed.
    fn delete<'a>(&'a self, transfer_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>>;

    /// All `Queued` entries in scheduling order.
    fn queued_by_priority(&self) -> BoxFuture<'_, Result<Vec<TransferQueueEntry>, StoreError>>;

    fn count_by_status(&self, status: TransferStatus) -> BoxFuture<'_, Result<usize, StoreError>>;

    /// Removes every entry with `status`; returns how many were removed.
    fn delete_by_status(&self, status: TransferStatus) -> BoxFuture<'_, Result<usize, StoreError>>;

    /// Every entry in scheduling order.
    fn list(&self) -> BoxFuture<'_, Result<Vec<TransferQueueEntry>, StoreError>>;
}

fn sorted(mut entries: Vec<TransferQueueEntry>) -> Vec<TransferQueueEntry> {
    entries.sort_by_key(TransferQueueEntry::queue_key);
    entries
}

// ---------------------------------------------------------------------------
// MemoryQueueStore
// ---------------------------------------------------------------------------

/// In-process queue store.
#[derive(Default)]
pub struct MemoryQueueStore {
    entries: RwLock<HashMap<String, TransferQueueEntry>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueStore for MemoryQueueStore {
    fn get<'a>(
        &'a self,
        transfer_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<TransferQueueEntry>, StoreError>> {
        Box::pin(async move { Ok(self.entries.read().await.get(transfer_id).cloned()) })
    }

    fn save<'a>(&'a self, entry: &'a TransferQueueEntry) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.entries
                .write()
                .await
                .insert(entry.transfer_id.clone(), entry.clone());
            Ok(())
        })
    }

    fn delete<'a>(&'a self, transfer_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move { Ok(self.entries.write().await.remove(transfer_id).is_some()) })
    }

    fn queued_by_priority(&self) -> BoxFuture<'_, Result<Vec<TransferQueueEntry>, StoreError>> {
        Box::pin(async move {
            let entries = self.entries.read().await;
            Ok(sorted(
                entries
                    .values()
                    .filter(|e| e.status == TransferStatus::Queued)
                    .cloned()
                    .collect(),
            ))
        })
    }

    fn count_by_status(&self, status: TransferStatus) -> BoxFuture<'_, Result<usize, StoreError>> {
        Box::pin(async move {
            let entries = self.entries.read().await;
            Ok(entries.values().filter(|e| e.status == status).count())
        })
    }

    fn delete_by_status(&self, status: TransferStatus) -> BoxFuture<'_, Result<usize, StoreError>> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, e| e.status != status);
            Ok(before - entries.len())
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<TransferQueueEntry>, StoreError>> {
        Box::pin(async move { Ok(sorted(self.entries.read().await.values().cloned().collect())) })
    }
}

// ---------------------------------------------------------------------------
// FileQueueStore
// ---------------------------------------------------------------------------

/// Queue store persisted as a single `queue.json` in a data directory.
pub struct FileQueueStore {
    map: JsonMapFile<TransferQueueEntry>,
}

impl FileQueueStore {
    /// Opens (or creates on first write) `<dir>/queue.json`.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path: PathBuf = dir.as_ref().join(QUEUE_FILE);
        Ok(Self {
            map: JsonMapFile::open(path).await?,
        })
    }

    pub fn path(&self) -> &Path {
        self.map.path()
    }
}

impl QueueStore for FileQueueStore {
    fn get<'a>(
        &'a self,
        transfer_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<TransferQueueEntry>, StoreError>> {
        Box::pin(async move { Ok(self.map.get(transfer_id).await) })
    }

    fn save<'a>(&'a self, entry: &'a TransferQueueEntry) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.map
                .insert(entry.transfer_id.clone(), entry.clone())
                .await
        })
    }

    fn delete<'a>(&'a self, transfer_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move { self.map.remove(transfer_id).await })
    }

    fn queued_by_priority(&self) -> BoxFuture<'_, Result<Vec<TransferQueueEntry>, StoreError>> {
        Box::pin(async move {
            let mut entries = self.map.values().await;
            entries.retain(|e| e.status == TransferStatus::Queued);
            Ok(sorted(entries))
        })
    }

    fn count_by_status(&self, status: TransferStatus) -> BoxFuture<'_, Result<usize, StoreError>> {
        Box::pin(async move {
            Ok(self
                .map
                .values()
                .await
                .iter()
                .filter(|e| e.status == status)
                .count())
        })
    }

    fn delete_by_status(&self, status: TransferStatus) -> BoxFuture<'_, Result<usize, StoreError>> {
        Box::pin(async move { self.map.retain(|_, e| e.status != status).await })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<TransferQueueEntry>, StoreError>> {
        Box::pin(async move { Ok(sorted(self.map.values().await)) })
    }
}
