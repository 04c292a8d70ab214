//! Transport manager trait.
//!
//! The host implements this on top of its actual P2P stack. The scheduler
//! only decides *when* a transfer runs; chunk I/O, encryption and peer
//! connectivity stay behind this seam, which also keeps scheduling logic
//! testable with mocks.

use peerdrop_store::BoxFuture;

use crate::{TransferQueueEntry, TransportError};

/// External collaborator that performs the byte-level transfer.
///
/// After `start_transfer` succeeds the transport owns the transfer until it
/// reports back through
/// [`TransferScheduler::on_transfer_complete`](crate::TransferScheduler::on_transfer_complete)
/// or [`TransferScheduler::on_transfer_failed`](crate::TransferScheduler::on_transfer_failed).
/// It reports each received chunk to the checkpoint manager.
pub trait TransportManager: Send + Sync {
    /// Begins moving chunks for an admitted entry. Should return once the
    /// transfer is underway, not when it finishes; the scheduler calls this
    /// outside its admission lock, so calling back into the scheduler from
    /// here is allowed.
    fn start_transfer<'a>(
        &'a self,
        entry: &'a TransferQueueEntry,
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Aborts in-flight bytes for a transfer that was cancelled or paused.
    fn stop_transfer<'a>(&'a self, transfer_id: &'a str) -> BoxFuture<'a, ()>;
}
