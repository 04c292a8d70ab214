//! Checkpoint lifecycle: create, update, restore, delete, cleanup.
//!
//! Live checkpoints are cached per transfer behind their own async mutex, so
//! updates to one transfer are serialized while different transfers update
//! in parallel. The registry lock only guards the map of handles and is never
//! held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use peerdrop_protocol::TransferProgress;
use peerdrop_store::validate_key;

use crate::{CheckpointConfig, CheckpointStore, TransferCheckpoint, TransferError};

struct LiveCheckpoint {
    checkpoint: TransferCheckpoint,
    /// Updates applied since the last store write.
    unsaved: u32,
    /// Set once deleted, so a handle obtained before the delete cannot
    /// write the record back.
    removed: bool,
}

type Handle = Arc<tokio::sync::Mutex<LiveCheckpoint>>;

/// Owns the checkpoint lifecycle on top of a [`CheckpointStore`].
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    config: CheckpointConfig,
    live: Mutex<HashMap<String, Handle>>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, config: CheckpointConfig) -> Self {
        Self {
            store,
            config,
            live: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// Starts tracking a transfer with an empty checkpoint and persists it.
    ///
    /// An existing checkpoint for the same id is replaced.
    pub async fn create_checkpoint(
        &self,
        transfer_id: &str,
        file_name: &str,
        total_chunks: u32,
        total_bytes: u64,
    ) -> Result<TransferCheckpoint, TransferError> {
        validate_key(transfer_id)
            .map_err(|_| TransferError::InvalidTransferId(transfer_id.to_string()))?;
        let checkpoint =
            TransferCheckpoint::new(transfer_id, file_name, total_chunks, total_bytes)?;
        self.store.save(&checkpoint).await?;

        let handle = Arc::new(tokio::sync::Mutex::new(LiveCheckpoint {
            checkpoint: checkpoint.clone(),
            unsaved: 0,
            removed: false,
        }));
        let previous = self.registry().insert(transfer_id.to_string(), handle);
        if let Some(previous) = previous {
            previous.lock().await.removed = true;
        }

        info!(
            transfer = %transfer_id,
            file = %file_name,
            total_chunks,
            total_bytes,
            "checkpoint created"
        );
        Ok(checkpoint)
    }

    /// Records one chunk arrival. The only mutation path during a transfer.
    ///
    /// Duplicate indices are idempotent and never double-count bytes. The
    /// record is written to the store every `persist_interval`-th update and
    /// whenever it has just become complete. Fails with
    /// [`TransferError::CheckpointNotFound`] if no checkpoint exists.
    pub async fn update_checkpoint(
        &self,
        transfer_id: &str,
        chunk_index: u32,
        chunk_size: u64,
    ) -> Result<TransferCheckpoint, TransferError> {
        let handle = self.handle(transfer_id).await?;
        let mut live = handle.lock().await;
        if live.removed {
            return Err(TransferError::CheckpointNotFound(transfer_id.to_string()));
        }

        let added = live.checkpoint.record_chunk(chunk_index, chunk_size)?;
        live.unsaved += 1;

        let complete = live.checkpoint.is_complete();
        if complete || live.unsaved >= self.config.effective_interval() {
            self.store.save(&live.checkpoint).await?;
            debug!(
                transfer = %transfer_id,
                received = live.checkpoint.received_count(),
                batched = live.unsaved,
                "checkpoint persisted"
            );
            live.unsaved = 0;
        }

        if !added {
            debug!(transfer = %transfer_id, chunk = chunk_index, "duplicate chunk ignored");
        }
        if complete {
            info!(transfer = %transfer_id, "all chunks received");
        }
        Ok(live.checkpoint.clone())
    }

    /// Writes pending updates for one transfer. Returns whether a write
    /// happened.
    pub async fn flush_checkpoint(&self, transfer_id: &str) -> Result<bool, TransferError> {
        let Some(handle) = self.live_handle(transfer_id) else {
            return Ok(false);
        };
        let mut live = handle.lock().await;
        if live.removed || live.unsaved == 0 {
            return Ok(false);
        }
        self.store.save(&live.checkpoint).await?;
        live.unsaved = 0;
        debug!(transfer = %transfer_id, "checkpoint flushed");
        Ok(true)
    }

    /// Writes pending updates for every live transfer, e.g. before shutdown.
    /// Returns the number of checkpoints written.
    pub async fn flush_all(&self) -> Result<usize, TransferError> {
        let ids: Vec<String> = self.registry().keys().cloned().collect();
        let mut flushed = 0;
        for id in ids {
            if self.flush_checkpoint(&id).await? {
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Loads a checkpoint for a resume decision. The caller re-requests
    /// [`TransferCheckpoint::missing_chunks`].
    pub async fn restore_checkpoint(
        &self,
        transfer_id: &str,
    ) -> Result<Option<TransferCheckpoint>, TransferError> {
        if let Some(handle) = self.live_handle(transfer_id) {
            let live = handle.lock().await;
            if !live.removed {
                return Ok(Some(live.checkpoint.clone()));
            }
        }
        Ok(self.store.load(transfer_id).await?)
    }

    /// Progress snapshot for one transfer.
    pub async fn transfer_progress(
        &self,
        transfer_id: &str,
    ) -> Result<TransferProgress, TransferError> {
        self.restore_checkpoint(transfer_id)
            .await?
            .map(|cp| cp.summary())
            .ok_or_else(|| TransferError::CheckpointNotFound(transfer_id.to_string()))
    }

    /// Removes a checkpoint once the assembled file has been verified.
    /// Returns whether a persisted record existed.
    pub async fn delete_checkpoint(&self, transfer_id: &str) -> Result<bool, TransferError> {
        let handle = self.registry().remove(transfer_id);
        let deleted = match handle {
            Some(handle) => {
                let mut live = handle.lock().await;
                live.removed = true;
                self.store.delete(transfer_id).await?
            }
            None => self.store.delete(transfer_id).await?,
        };
        debug!(transfer = %transfer_id, deleted, "checkpoint deleted");
        Ok(deleted)
    }

    /// Reaps checkpoints not updated within the retention window.
    pub async fn cleanup_old_checkpoints(&self) -> Result<usize, TransferError> {
        self.cleanup_older_than(Utc::now() - self.config.retention())
            .await
    }

    /// Reaps checkpoints last updated before `cutoff`, live or persisted.
    ///
    /// Live checkpoints that are still fresh but have unsaved updates are
    /// written first, so a stale persisted copy of an active transfer is
    /// refreshed rather than reaped.
    pub async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, TransferError> {
        let handles: Vec<(String, Handle)> = self
            .registry()
            .iter()
            .map(|(id, h)| (id.clone(), Arc::clone(h)))
            .collect();
        for (id, handle) in handles {
            let mut live = handle.lock().await;
            if live.removed {
                continue;
            }
            if live.checkpoint.updated_at() < cutoff {
                live.removed = true;
                let mut registry = self.registry();
                if registry.get(&id).is_some_and(|h| Arc::ptr_eq(h, &handle)) {
                    registry.remove(&id);
                }
            } else if live.unsaved > 0 {
                self.store.save(&live.checkpoint).await?;
                live.unsaved = 0;
            }
        }

        let removed = self.store.delete_older_than(cutoff).await?;
        if removed > 0 {
            info!(removed, %cutoff, "stale checkpoints removed");
        }
        Ok(removed)
    }

    /// Every persisted checkpoint that still has missing chunks, for
    /// offering resumes at startup.
    pub async fn pending_checkpoints(&self) -> Result<Vec<TransferCheckpoint>, TransferError> {
        let mut pending: Vec<TransferCheckpoint> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|cp| !cp.is_complete())
            .collect();
        pending.sort_by(|a, b| a.created_at().cmp(&b.created_at()));
        Ok(pending)
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Handle>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_handle(&self, transfer_id: &str) -> Option<Handle> {
        self.registry().get(transfer_id).cloned()
    }

    /// Returns the live handle, adopting the persisted record on first use
    /// (e.g. after a restart).
    async fn handle(&self, transfer_id: &str) -> Result<Handle, TransferError> {
        if let Some(handle) = self.live_handle(transfer_id) {
            return Ok(handle);
        }
        let Some(checkpoint) = self.store.load(transfer_id).await? else {
            return Err(TransferError::CheckpointNotFound(transfer_id.to_string()));
        };
        let fresh: Handle = Arc::new(tokio::sync::Mutex::new(LiveCheckpoint {
            checkpoint,
            unsaved: 0,
            removed: false,
        }));
        let handle = self
            .registry()
            .entry(transfer_id.to_string())
            .or_insert_with(|| Arc::clone(&fresh))
            .clone();
        if !Arc::ptr_eq(&handle, &fresh) {
            return Ok(handle);
        }

        // A delete between the load and the insert found nothing to mark.
        let mut live = handle.lock().await;
        if self.store.load(transfer_id).await?.is_none() {
            live.removed = true;
            let mut registry = self.registry();
            if registry.get(transfer_id).is_some_and(|h| Arc::ptr_eq(h, &handle)) {
                registry.remove(transfer_id);
            }
            return Err(TransferError::CheckpointNotFound(transfer_id.to_string()));
        }
        drop(live);
        debug!(transfer = %transfer_id, "adopted persisted checkpoint");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use peerdrop_store::{BoxFuture, StoreError};

    use super::*;
    use crate::{FileCheckpointStore, MemoryCheckpointStore};

    fn manager_with(store: Arc<MemoryCheckpointStore>, persist_interval: u32) -> CheckpointManager {
        CheckpointManager::new(
            store,
            CheckpointConfig {
                persist_interval,
                ..CheckpointConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn create_starts_empty_and_persists() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let manager = manager_with(Arc::clone(&store), 10);

        let cp = manager.create_checkpoint("t1", "a.bin", 10, 1000).await.unwrap();
        assert!(cp.received_chunks().is_empty());
        assert_eq!(cp.progress(), 0.0);
        assert!(!cp.is_complete());
        assert_eq!(cp.last_chunk_index(), None);
        assert_eq!(store.save_count(), 1);
        assert!(store.load("t1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn create_rejects_bad_input() {
        let manager = manager_with(Arc::new(MemoryCheckpointStore::new()), 10);
        assert!(matches!(
            manager.create_checkpoint("", "a.bin", 1, 1).await,
            Err(TransferError::InvalidTransferId(_))
        ));
        assert!(matches!(
            manager.create_checkpoint("t1", "a.bin", 0, 0).await,
            Err(TransferError::InvalidChunkCount(_))
        ));
    }

    #[tokio::test]
    async fn update_without_checkpoint_is_an_error() {
        let manager = manager_with(Arc::new(MemoryCheckpointStore::new()), 10);
        let result = manager.update_checkpoint("ghost", 0, 10).await;
        assert!(matches!(result, Err(TransferError::CheckpointNotFound(_))));
    }

    #[tokio::test]
    async fn update_dedups_and_tracks_last_index() {
        let manager = manager_with(Arc::new(MemoryCheckpointStore::new()), 10);
        manager.create_checkpoint("t1", "a.bin", 10, 1000).await.unwrap();

        for i in [0, 1, 2, 5, 7, 9, 5, 0] {
            manager.update_checkpoint("t1", i, 100).await.unwrap();
        }
        let cp = manager.restore_checkpoint("t1").await.unwrap().unwrap();
        assert_eq!(cp.missing_chunks(), vec![3, 4, 6, 8]);
        assert!((cp.progress() - 60.0).abs() < f64::EPSILON);
        assert_eq!(cp.bytes_transferred(), 600);
        assert_eq!(cp.last_chunk_index(), Some(0));
    }

    #[tokio::test]
    async fn persists_on_cadence_and_completion() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let manager = manager_with(Arc::clone(&store), 10);
        manager.create_checkpoint("t1", "a.bin", 25, 2500).await.unwrap();
        assert_eq!(store.save_count(), 1);

        for i in 0..9 {
            manager.update_checkpoint("t1", i, 100).await.unwrap();
        }
        assert_eq!(store.save_count(), 1);
        let persisted = store.load("t1").await.unwrap().unwrap();
        assert!(persisted.received_chunks().is_empty());

        manager.update_checkpoint("t1", 9, 100).await.unwrap();
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.load("t1").await.unwrap().unwrap().received_count(), 10);

        for i in 10..24 {
            manager.update_checkpoint("t1", i, 100).await.unwrap();
        }
        assert_eq!(store.save_count(), 3);

        // Completion writes even off-cadence.
        let cp = manager.update_checkpoint("t1", 24, 100).await.unwrap();
        assert!(cp.is_complete());
        assert_eq!(store.save_count(), 4);
        assert!(store.load("t1").await.unwrap().unwrap().is_complete());
    }

    #[tokio::test]
    async fn flush_writes_pending_updates() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let manager = manager_with(Arc::clone(&store), 10);
        manager.create_checkpoint("t1", "a.bin", 10, 1000).await.unwrap();
        manager.update_checkpoint("t1", 3, 100).await.unwrap();

        assert!(manager.flush_checkpoint("t1").await.unwrap());
        assert!(!manager.flush_checkpoint("t1").await.unwrap());
        assert_eq!(store.load("t1").await.unwrap().unwrap().received_chunks(), vec![3]);
        assert!(!manager.flush_checkpoint("unknown").await.unwrap());
    }

    #[tokio::test]
    async fn flush_all_counts_written() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let manager = manager_with(Arc::clone(&store), 10);
        for id in ["a", "b", "c"] {
            manager.create_checkpoint(id, "f", 4, 40).await.unwrap();
        }
        manager.update_checkpoint("a", 0, 10).await.unwrap();
        manager.update_checkpoint("c", 1, 10).await.unwrap();
        assert_eq!(manager.flush_all().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn resumes_from_store_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = CheckpointConfig {
            persist_interval: 1,
            ..CheckpointConfig::default()
        };
        {
            let store =
                Arc::new(FileCheckpointStore::open(dir.path().to_path_buf()).await.unwrap());
            let manager = CheckpointManager::new(store, config.clone());
            manager.create_checkpoint("t1", "a.bin", 5, 500).await.unwrap();
            manager.update_checkpoint("t1", 0, 100).await.unwrap();
            manager.update_checkpoint("t1", 3, 100).await.unwrap();
        }

        let store = Arc::new(FileCheckpointStore::open(dir.path().to_path_buf()).await.unwrap());
        let manager = CheckpointManager::new(store, config);
        let cp = manager.restore_checkpoint("t1").await.unwrap().unwrap();
        assert_eq!(cp.missing_chunks(), vec![1, 2, 4]);
        assert_eq!(cp.last_chunk_index(), Some(3));

        // Updates continue on the adopted record.
        let cp = manager.update_checkpoint("t1", 3, 100).await.unwrap();
        assert_eq!(cp.bytes_transferred(), 200);
        let cp = manager.update_checkpoint("t1", 1, 100).await.unwrap();
        assert_eq!(cp.bytes_transferred(), 300);
    }

    #[tokio::test]
    async fn delete_removes_live_and_persisted() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let manager = manager_with(Arc::clone(&store), 10);
        manager.create_checkpoint("t1", "a.bin", 2, 20).await.unwrap();

        assert!(manager.delete_checkpoint("t1").await.unwrap());
        assert!(manager.restore_checkpoint("t1").await.unwrap().is_none());
        assert!(matches!(
            manager.update_checkpoint("t1", 0, 10).await,
            Err(TransferError::CheckpointNotFound(_))
        ));
        assert!(!manager.delete_checkpoint("t1").await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_respects_retention_window() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let now = Utc::now();

        let mut old = TransferCheckpoint::new("old", "a.bin", 3, 30).unwrap();
        old.set_updated_at(now - chrono::Duration::days(8));
        store.save(&old).await.unwrap();
        let mut recent = TransferCheckpoint::new("recent", "b.bin", 3, 30).unwrap();
        recent.set_updated_at(now - chrono::Duration::days(6));
        store.save(&recent).await.unwrap();

        let manager = manager_with(Arc::clone(&store), 10);
        assert_eq!(manager.cleanup_old_checkpoints().await.unwrap(), 1);
        assert!(manager.restore_checkpoint("old").await.unwrap().is_none());
        assert!(manager.restore_checkpoint("recent").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cleanup_drops_stale_live_handles() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let manager = manager_with(Arc::clone(&store), 10);
        manager.create_checkpoint("t1", "a.bin", 3, 30).await.unwrap();

        let removed = manager
            .cleanup_older_than(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(manager.restore_checkpoint("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_excludes_complete() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let manager = manager_with(Arc::clone(&store), 1);
        manager.create_checkpoint("done", "a.bin", 1, 10).await.unwrap();
        manager.update_checkpoint("done", 0, 10).await.unwrap();
        manager.create_checkpoint("partial", "b.bin", 2, 20).await.unwrap();
        manager.update_checkpoint("partial", 1, 10).await.unwrap();

        let pending = manager.pending_checkpoints().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].transfer_id(), "partial");
        assert_eq!(pending[0].missing_chunks(), vec![0]);
    }

    #[tokio::test]
    async fn transfer_progress_snapshot() {
        let manager = manager_with(Arc::new(MemoryCheckpointStore::new()), 10);
        manager.create_checkpoint("t1", "a.bin", 4, 400).await.unwrap();
        manager.update_checkpoint("t1", 2, 100).await.unwrap();
        let progress = manager.transfer_progress("t1").await.unwrap();
        assert_eq!(progress.received_chunks, 1);
        assert!((progress.percentage() - 25.0).abs() < f64::EPSILON);
        assert!(manager.transfer_progress("missing").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_across_and_within_transfers() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let manager = Arc::new(manager_with(Arc::clone(&store), 10));
        for t in 0..4 {
            manager
                .create_checkpoint(&format!("t{t}"), "f", 100, 10_000)
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for t in 0..4 {
            // Two writers per transfer, overlapping ranges.
            for start in [0u32, 50] {
                let m = Arc::clone(&manager);
                handles.push(tokio::spawn(async move {
                    let id = format!("t{t}");
                    for i in start..start + 60 {
                        m.update_checkpoint(&id, i % 100, 100).await.unwrap();
                    }
                }));
            }
        }
        for h in handles {
            h.await.unwrap();
        }

        for t in 0..4 {
            let cp = manager
                .restore_checkpoint(&format!("t{t}"))
                .await
                .unwrap()
                .unwrap();
            // 0..60 and 50..110 (mod 100) together cover all 100 indices.
            assert!(cp.is_complete());
            assert_eq!(cp.bytes_transferred(), 10_000);
        }
    }

    /// Deletes the record right after handing out the first load, as a
    /// concurrent `delete_checkpoint` would.
    struct DeletedAfterLoad {
        inner: MemoryCheckpointStore,
        loads: AtomicUsize,
    }

    impl CheckpointStore for DeletedAfterLoad {
        fn load<'a>(
            &'a self,
            transfer_id: &'a str,
        ) -> BoxFuture<'a, Result<Option<TransferCheckpoint>, StoreError>> {
            Box::pin(async move {
                let loaded = self.inner.load(transfer_id).await?;
                let first = self.loads.fetch_add(1, Ordering::SeqCst) == 0;
                if first {
                    self.inner.delete(transfer_id).await?;
                }
                Ok(loaded)
            })
        }

        fn save<'a>(
            &'a self,
            checkpoint: &'a TransferCheckpoint,
        ) -> BoxFuture<'a, Result<(), StoreError>> {
            self.inner.save(checkpoint)
        }

        fn delete<'a>(
            &'a self,
            transfer_id: &'a str,
        ) -> BoxFuture<'a, Result<bool, StoreError>> {
            self.inner.delete(transfer_id)
        }

        fn delete_older_than(
            &self,
            cutoff: DateTime<Utc>,
        ) -> BoxFuture<'_, Result<usize, StoreError>> {
            self.inner.delete_older_than(cutoff)
        }

        fn list(&self) -> BoxFuture<'_, Result<Vec<TransferCheckpoint>, StoreError>> {
            self.inner.list()
        }
    }

    #[tokio::test]
    async fn adoption_does_not_revive_deleted_record() {
        let inner = MemoryCheckpointStore::new();
        inner
            .save(&TransferCheckpoint::new("t1", "a.bin", 4, 400).unwrap())
            .await
            .unwrap();
        let store = Arc::new(DeletedAfterLoad {
            inner,
            loads: Default::default(),
        });
        let manager = CheckpointManager::new(
            store.clone(),
            CheckpointConfig {
                persist_interval: 1,
                ..CheckpointConfig::default()
            },
        );

        let err = manager.update_checkpoint("t1", 0, 100).await.unwrap_err();
        assert!(matches!(err, TransferError::CheckpointNotFound(_)));
        assert!(store.inner.list().await.unwrap().is_empty());

        let err = manager.update_checkpoint("t1", 1, 100).await.unwrap_err();
        assert!(matches!(err, TransferError::CheckpointNotFound(_)));
        assert!(manager.restore_checkpoint("t1").await.unwrap().is_none());
    }
}
