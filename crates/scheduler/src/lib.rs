//! Transfer scheduler: admission control over a bounded pool of concurrently
//! active transfers, priority ordering, bounded retry, pause / resume /
//! cancel.
//!
//! The scheduler never moves bytes itself. On admission it hands the entry to
//! a [`TransportManager`] supplied by the host, which later reports the
//! outcome through [`TransferScheduler::on_transfer_complete`] or
//! [`TransferScheduler::on_transfer_failed`].
//!
//! # Lifecycle
//!
//! `Queued → Transferring → {Completed, Failed}`, `Failed → Queued` through a
//! bounded retry, `{Queued, Transferring} → Paused → Queued`, and any entry
//! can be cancelled (removed). Terminal entries stay until bulk-cleared.

mod config;
mod entry;
mod error;
mod retry;
mod scheduler;
mod store;
mod transport;
mod types;

pub use config::SchedulerConfig;
pub use entry::{EnqueueRequest, TransferQueueEntry};
pub use error::{SchedulerError, TransportError};
pub use retry::RetryPolicy;
pub use scheduler::TransferScheduler;
pub use store::{FileQueueStore, MemoryQueueStore, QueueStore};
pub use transport::TransportManager;
pub use types::SchedulerEvent;

pub use peerdrop_protocol::{QueueStats, TransferStatus};
