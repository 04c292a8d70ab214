//! Checkpoint persistence: the store trait and its memory and file backends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use peerdrop_store::{BoxFuture, StoreError, validate_key, write_atomic};

use crate::TransferCheckpoint;

const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";

/// Checkpoint persistence keyed by transfer id.
///
/// Implementations must be safe to call from several tasks at once; the
/// manager serializes writes per transfer but not across transfers.
pub trait CheckpointStore: Send + Sync {
    /// Loads the checkpoint for `transfer_id`, if one exists.
    fn load<'a>(
        &'a self,
        transfer_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<TransferCheckpoint>, StoreError>>;

    /// Inserts or replaces a checkpoint.
    fn save<'a>(&'a self, checkpoint: &'a TransferCheckpoint)
    -> BoxFuture<'a, Result<(), StoreError>>;

    /// Removes a checkpoint. Returns `false` if none existed.
    fn delete<'a>(&'a self, transfer_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>>;

    /// Removes every checkpoint last updated before `cutoff`.
    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, Result<usize, StoreError>>;

    /// Returns every stored checkpoint.
    fn list(&self) -> BoxFuture<'_, Result<Vec<TransferCheckpoint>, StoreError>>;
}

// ---------------------------------------------------------------------------
// MemoryCheckpointStore
// ---------------------------------------------------------------------------

/// In-process checkpoint store.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    records: RwLock<HashMap<String, TransferCheckpoint>>,
    saves: AtomicUsize,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save` calls served so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load<'a>(
        &'a self,
        transfer_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<TransferCheckpoint>, StoreError>> {
        Box::pin(async move { Ok(self.records.read().await.get(transfer_id).cloned()) })
    }

    fn save<'a>(
        &'a self,
        checkpoint: &'a TransferCheckpoint,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.records
                .write()
                .await
                .insert(checkpoint.transfer_id().to_string(), checkpoint.clone());
            self.saves.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, transfer_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move { Ok(self.records.write().await.remove(transfer_id).is_some()) })
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, Result<usize, StoreError>> {
        Box::pin(async move {
            let mut records = self.records.write().await;
            let before = records.len();
            records.retain(|_, cp| cp.updated_at() >= cutoff);
            Ok(before - records.len())
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<TransferCheckpoint>, StoreError>> {
        Box::pin(async move { Ok(self.records.read().await.values().cloned().collect()) })
    }
}

// ---------------------------------------------------------------------------
// FileCheckpointStore
// ---------------------------------------------------------------------------

/// Stores each checkpoint as `<transfer_id>.checkpoint.json` under a base
/// directory. Writes are atomic; transfers never share a file, so parallel
/// updates of different transfers do not contend.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    base_dir: PathBuf,
}

impl FileCheckpointStore {
    /// Opens (and creates if needed) the checkpoint directory.
    pub async fn open(base_dir: PathBuf) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, transfer_id: &str) -> Result<PathBuf, StoreError> {
        validate_key(transfer_id)?;
        Ok(self.base_dir.join(format!("{transfer_id}{CHECKPOINT_SUFFIX}")))
    }

    /// Reads every parseable checkpoint file with its path. Unreadable or
    /// corrupt files are skipped with a warning so one bad file cannot block
    /// cleanup of the rest.
    async fn scan(&self) -> Result<Vec<(PathBuf, TransferCheckpoint)>, StoreError> {
        let mut out = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let is_checkpoint = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(CHECKPOINT_SUFFIX));
            if !is_checkpoint {
                continue;
            }
            match read_checkpoint(&path).await {
                Ok(Some(cp)) => out.push((path, cp)),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint")
                }
            }
        }
        Ok(out)
    }
}

async fn read_checkpoint(path: &Path) -> Result<Option<TransferCheckpoint>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load<'a>(
        &'a self,
        transfer_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<TransferCheckpoint>, StoreError>> {
        Box::pin(async move {
            let path = self.path_for(transfer_id)?;
            read_checkpoint(&path).await
        })
    }

    fn save<'a>(
        &'a self,
        checkpoint: &'a TransferCheckpoint,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let path = self.path_for(checkpoint.transfer_id())?;
            let json = serde_json::to_vec_pretty(checkpoint)?;
            write_atomic(&path, &json).await
        })
    }

    fn delete<'a>(&'a self, transfer_id: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let path = self.path_for(transfer_id)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, Result<usize, StoreError>> {
        Box::pin(async move {
            let mut removed = 0;
            for (path, cp) in self.scan().await? {
                if cp.updated_at() >= cutoff {
                    continue;
                }
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            debug!(dir = %self.base_dir.display(), removed, "removed stale checkpoint files");
            Ok(removed)
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<TransferCheckpoint>, StoreError>> {
        Box::pin(async move { Ok(self.scan().await?.into_iter().map(|(_, cp)| cp).collect()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(id: &str) -> TransferCheckpoint {
        TransferCheckpoint::new(id, "photo.jpg", 4, 4096).unwrap()
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load("t1").await.unwrap().is_none());

        let cp = checkpoint("t1").with_received_chunk(2, 1024).unwrap();
        store.save(&cp).await.unwrap();
        assert_eq!(store.load("t1").await.unwrap(), Some(cp));
        assert_eq!(store.save_count(), 1);

        assert!(store.delete("t1").await.unwrap());
        assert!(!store.delete("t1").await.unwrap());
    }

    #[tokio::test]
    async fn memory_store_deletes_only_stale() {
        let store = MemoryCheckpointStore::new();
        let mut stale = checkpoint("old");
        stale.set_updated_at(Utc::now() - chrono::Duration::days(8));
        store.save(&stale).await.unwrap();
        store.save(&checkpoint("fresh")).await.unwrap();

        let removed = store
            .delete_older_than(Utc::now() - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .iter()
            .map(|cp| cp.transfer_id().to_string())
            .collect();
        assert_eq!(ids, vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let cp = checkpoint("t1").with_received_chunk(0, 1024).unwrap();
        {
            let store = FileCheckpointStore::open(dir.path().to_path_buf()).await.unwrap();
            store.save(&cp).await.unwrap();
        }
        let store = FileCheckpointStore::open(dir.path().to_path_buf()).await.unwrap();
        let loaded = store.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded, cp);
        assert_eq!(loaded.missing_chunks(), vec![1, 2, 3]);
        assert!(dir.path().join("t1.checkpoint.json").exists());
    }

    #[tokio::test]
    async fn file_store_rejects_unsafe_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path().to_path_buf()).await.unwrap();
        let result = store.load("../escape").await;
        assert!(matches!(result, Err(StoreError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn file_store_cleanup_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path().to_path_buf()).await.unwrap();

        let mut stale = checkpoint("old");
        stale.set_updated_at(Utc::now() - chrono::Duration::days(8));
        store.save(&stale).await.unwrap();
        store.save(&checkpoint("fresh")).await.unwrap();
        std::fs::write(dir.path().join("broken.checkpoint.json"), "{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let removed = store
            .delete_older_than(Utc::now() - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.load("old").await.unwrap().is_none());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_store_delete_missing_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path().to_path_buf()).await.unwrap();
        assert!(!store.delete("nope").await.unwrap());
    }
}
