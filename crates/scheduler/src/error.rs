//! Scheduler and transport error types.

use peerdrop_protocol::TransferStatus;
use peerdrop_store::StoreError;

/// Errors produced by the transfer scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("transfer not found: {0}")]
    NotFound(String),

    #[error("transfer already queued: {0}")]
    AlreadyQueued(String),

    #[error("invalid transfer id: {0}")]
    InvalidTransferId(String),

    #[error(
        "transfer {transfer_id} cannot be retried \
         ({status}, {retry_count}/{max_retries} retries used)"
    )]
    NotRetryable {
        transfer_id: String,
        status: TransferStatus,
        retry_count: u32,
        max_retries: u32,
    },

    #[error("cannot {action} transfer {transfer_id} while {from}")]
    InvalidTransition {
        transfer_id: String,
        from: TransferStatus,
        action: &'static str,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors reported by a [`TransportManager`](crate::TransportManager).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("transfer failed: {0}")]
    Failed(String),
}
