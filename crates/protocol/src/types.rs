use std::fmt;

use serde::{Deserialize, Serialize};

/// Current state of a queued transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "transferring")]
    Transferring,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl TransferStatus {
    /// Returns `true` for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Transferring => "transferring",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the transfer queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub queued_count: usize,
    pub transferring_count: usize,
    #[serde(default)]
    pub paused_count: usize,
    #[serde(default)]
    pub completed_count: usize,
    pub failed_count: usize,
    pub total_count: usize,
}

impl QueueStats {
    /// Returns `true` when nothing is waiting or running.
    pub fn is_idle(&self) -> bool {
        self.queued_count == 0 && self.transferring_count == 0
    }
}

/// Progress of a single transfer as derived from its checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub transfer_id: String,
    pub file_name: String,
    pub received_chunks: u32,
    pub total_chunks: u32,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl TransferProgress {
    /// Returns the chunk progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        f64::from(self.received_chunks) * 100.0 / f64::from(self.total_chunks)
    }

    /// Returns `true` once every chunk has been received.
    pub fn is_complete(&self) -> bool {
        self.total_chunks > 0 && self.received_chunks == self.total_chunks
    }
}
