//! Keyed records cached in memory and persisted as one JSON file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{StoreError, write_atomic};

/// A string-keyed map mirrored to a JSON file.
///
/// Reads are served from memory. Every mutation rewrites the file while the
/// write lock is held, so the file always reflects a prefix of the mutation
/// order.
pub struct JsonMapFile<V> {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, V>>,
}

impl<V> JsonMapFile<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// Opens the map, loading existing records from `path` if present.
    pub async fn open(path: PathBuf) -> Result<Self, StoreError> {
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(data) if data.trim().is_empty() => BTreeMap::new(),
            Ok(data) => serde_json::from_str(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), records = entries.len(), "loaded json map");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a clone of the record stored under `key`.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.entries.read().await.get(key).cloned()
    }

    /// Returns clones of every record, ordered by key.
    pub async fn values(&self) -> Vec<V> {
        self.entries.read().await.values().cloned().collect()
    }

    /// Inserts or replaces a record and persists the map.
    pub async fn insert(&self, key: String, value: V) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(key, value);
        self.persist(&entries).await
    }

    /// Removes a record. Returns `false` (and skips the write) if absent.
    pub async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.persist(&entries).await?;
        Ok(true)
    }

    /// Keeps only the records for which `keep` returns `true`.
    ///
    /// Returns the number of removed records.
    pub async fn retain<F>(&self, mut keep: F) -> Result<usize, StoreError>
    where
        F: FnMut(&str, &V) -> bool + Send,
    {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, v| keep(k, v));
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries).await?;
        }
        Ok(removed)
    }

    async fn persist(&self, entries: &BTreeMap<String, V>) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(entries)?;
        write_atomic(&self.path, &json).await?;
        debug!(path = %self.path.display(), records = entries.len(), "persisted json map");
        Ok(())
    }
}
