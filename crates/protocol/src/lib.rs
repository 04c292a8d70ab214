//! Shared constants and serializable types for the peerdrop transfer layer.
//!
//! These are the shapes the transport manager and any UI consume: transfer
//! status, queue statistics and per-transfer progress snapshots.

pub mod constants;
pub mod types;

// Re-export primary types for convenience.
pub use constants::{
    CHECKPOINT_PERSIST_INTERVAL, CHECKPOINT_RETENTION_DAYS, MAX_CONCURRENT_TRANSFERS, MAX_RETRIES,
};
pub use types::{QueueStats, TransferProgress, TransferStatus};
