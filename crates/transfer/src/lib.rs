//! Resumable transfer checkpoints.
//!
//! A [`TransferCheckpoint`] records which chunks of one file have arrived.
//! The [`CheckpointManager`] owns the create / update / restore / delete /
//! cleanup lifecycle on top of a [`CheckpointStore`]. Chunk I/O itself is the
//! transport manager's job; it reports every arrival through
//! [`CheckpointManager::update_checkpoint`] and uses
//! [`TransferCheckpoint::missing_chunks`] to decide what to re-request.

mod checkpoint;
mod chunk_set;
mod config;
mod manager;
mod store;

pub use checkpoint::TransferCheckpoint;
pub use chunk_set::ChunkSet;
pub use config::CheckpointConfig;
pub use manager::CheckpointManager;
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};

use peerdrop_store::StoreError;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("chunk {index} out of range for {transfer_id} ({total} chunks)")]
    ChunkOutOfRange {
        transfer_id: String,
        index: u32,
        total: u32,
    },

    #[error("transfer {0} must have at least one chunk")]
    InvalidChunkCount(String),

    #[error("invalid transfer id: {0}")]
    InvalidTransferId(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
