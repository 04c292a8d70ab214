/// Maximum number of transfers allowed in `Transferring` at the same time.
pub const MAX_CONCURRENT_TRANSFERS: usize = 3;

/// Retry budget for a failed transfer before manual action is required.
pub const MAX_RETRIES: u32 = 3;

/// A live checkpoint is written to its store every N-th chunk update.
///
/// Completion and explicit flushes always write regardless of the cadence.
pub const CHECKPOINT_PERSIST_INTERVAL: u32 = 10;

/// Checkpoints not touched for this many days are considered abandoned.
pub const CHECKPOINT_RETENTION_DAYS: u32 = 7;
