use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use peerdrop_protocol::TransferProgress;

use crate::TransferError;
use crate::chunk_set::ChunkSet;

/// Per-transfer record of received chunks, used to resume after a crash or
/// disconnect without re-fetching completed chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CheckpointRecord", into = "CheckpointRecord")]
pub struct TransferCheckpoint {
    transfer_id: String,
    file_name: String,
    total_chunks: u32,
    total_bytes: u64,
    received: ChunkSet,
    last_chunk_index: Option<u32>,
    bytes_transferred: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransferCheckpoint {
    /// Creates an empty checkpoint. `total_chunks` must be positive.
    pub fn new(
        transfer_id: impl Into<String>,
        file_name: impl Into<String>,
        total_chunks: u32,
        total_bytes: u64,
    ) -> Result<Self, TransferError> {
        let transfer_id = transfer_id.into();
        if total_chunks == 0 {
            return Err(TransferError::InvalidChunkCount(transfer_id));
        }
        let now = Utc::now();
        Ok(Self {
            transfer_id,
            file_name: file_name.into(),
            total_chunks,
            total_bytes,
            received: ChunkSet::new(total_chunks),
            last_chunk_index: None,
            bytes_transferred: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies one chunk arrival.
    ///
    /// The index is added if absent and always becomes `last_chunk_index`;
    /// `chunk_size` is counted only the first time an index is seen, so
    /// duplicate delivery never inflates `bytes_transferred`. Returns whether
    /// the index was new.
    pub fn record_chunk(
        &mut self,
        chunk_index: u32,
        chunk_size: u64,
    ) -> Result<bool, TransferError> {
        if chunk_index >= self.total_chunks {
            return Err(TransferError::ChunkOutOfRange {
                transfer_id: self.transfer_id.clone(),
                index: chunk_index,
                total: self.total_chunks,
            });
        }
        let added = self.received.insert(chunk_index);
        self.last_chunk_index = Some(chunk_index);
        if added {
            self.bytes_transferred = self.bytes_transferred.saturating_add(chunk_size);
        }
        self.updated_at = Utc::now();
        Ok(added)
    }

    /// Value-returning form of [`record_chunk`](Self::record_chunk).
    pub fn with_received_chunk(
        mut self,
        chunk_index: u32,
        chunk_size: u64,
    ) -> Result<Self, TransferError> {
        self.record_chunk(chunk_index, chunk_size)?;
        Ok(self)
    }

    /// Received chunk indices, ascending.
    pub fn received_chunks(&self) -> Vec<u32> {
        self.received.iter().collect()
    }

    /// Chunk indices still to fetch, ascending. Complement of
    /// [`received_chunks`](Self::received_chunks) within `0..total_chunks`.
    pub fn missing_chunks(&self) -> Vec<u32> {
        self.received.missing().collect()
    }

    /// Percentage of chunks received (0-100).
    pub fn progress(&self) -> f64 {
        f64::from(self.received.len()) * 100.0 / f64::from(self.total_chunks)
    }

    pub fn is_complete(&self) -> bool {
        self.received.is_full()
    }

    pub fn has_chunk(&self, chunk_index: u32) -> bool {
        self.received.contains(chunk_index)
    }

    pub fn received_count(&self) -> u32 {
        self.received.len()
    }

    pub fn transfer_id(&self) -> &str {
        &self.transfer_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Index applied by the most recent update, if any.
    pub fn last_chunk_index(&self) -> Option<u32> {
        self.last_chunk_index
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Progress snapshot for the transport manager or UI.
    pub fn summary(&self) -> TransferProgress {
        TransferProgress {
            transfer_id: self.transfer_id.clone(),
            file_name: self.file_name.clone(),
            received_chunks: self.received.len(),
            total_chunks: self.total_chunks,
            bytes_transferred: self.bytes_transferred,
            total_bytes: self.total_bytes,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

/// Persisted shape: received chunks as a list, `-1` for "no chunk yet".
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointRecord {
    transfer_id: String,
    file_name: String,
    total_chunks: u32,
    total_bytes: u64,
    received_chunks: Vec<u32>,
    last_chunk_index: i64,
    bytes_transferred: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TransferCheckpoint> for CheckpointRecord {
    fn from(cp: TransferCheckpoint) -> Self {
        Self {
            received_chunks: cp.received.iter().collect(),
            last_chunk_index: cp.last_chunk_index.map_or(-1, i64::from),
            transfer_id: cp.transfer_id,
            file_name: cp.file_name,
            total_chunks: cp.total_chunks,
            total_bytes: cp.total_bytes,
            bytes_transferred: cp.bytes_transferred,
            created_at: cp.created_at,
            updated_at: cp.updated_at,
        }
    }
}

impl TryFrom<CheckpointRecord> for TransferCheckpoint {
    type Error = TransferError;

    fn try_from(record: CheckpointRecord) -> Result<Self, Self::Error> {
        if record.total_chunks == 0 {
            return Err(TransferError::InvalidChunkCount(record.transfer_id));
        }
        let mut received = ChunkSet::new(record.total_chunks);
        for index in record.received_chunks {
            if index >= record.total_chunks {
                return Err(TransferError::ChunkOutOfRange {
                    transfer_id: record.transfer_id,
                    index,
                    total: record.total_chunks,
                });
            }
            received.insert(index);
        }
        let last_chunk_index = u32::try_from(record.last_chunk_index)
            .ok()
            .filter(|&i| i < record.total_chunks);
        Ok(Self {
            transfer_id: record.transfer_id,
            file_name: record.file_name,
            total_chunks: record.total_chunks,
            total_bytes: record.total_bytes,
            received,
            last_chunk_index,
            bytes_transferred: record.bytes_transferred,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}
