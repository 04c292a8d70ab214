//! Public event types emitted by the scheduler.

use peerdrop_protocol::TransferStatus;

/// Events emitted by the transfer scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// A transfer request joined the queue.
    Enqueued { transfer_id: String, priority: i32 },
    /// A queued transfer took an active slot and is being started.
    Admitted { transfer_id: String },
    /// A transfer finished successfully.
    Completed { transfer_id: String },
    /// A transfer failed. `can_retry` reflects the remaining budget.
    Failed {
        transfer_id: String,
        error: String,
        retry_count: u32,
        can_retry: bool,
    },
    /// A failed transfer was requeued; `attempt` is the new retry count.
    Retrying { transfer_id: String, attempt: u32 },
    /// A transfer left running by a previous process was requeued.
    Interrupted { transfer_id: String },
    Paused { transfer_id: String },
    Resumed { transfer_id: String },
    /// A transfer was removed from the queue. `was_active` means its
    /// transport was asked to stop.
    Cancelled { transfer_id: String, was_active: bool },
    /// Terminal entries of `status` were bulk-removed.
    Cleared { status: TransferStatus, count: usize },
}

impl SchedulerEvent {
    /// Transfer the event refers to, if any.
    pub fn transfer_id(&self) -> Option<&str> {
        match self {
            Self::Enqueued { transfer_id, .. }
            | Self::Admitted { transfer_id }
            | Self::Completed { transfer_id }
            | Self::Failed { transfer_id, .. }
            | Self::Retrying { transfer_id, .. }
            | Self::Interrupted { transfer_id }
            | Self::Paused { transfer_id }
            | Self::Resumed { transfer_id }
            | Self::Cancelled { transfer_id, .. } => Some(transfer_id),
            Self::Cleared { .. } => None,
        }
    }
}
