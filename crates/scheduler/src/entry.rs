use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use peerdrop_protocol::{MAX_RETRIES, TransferStatus};

/// Parameters for [`TransferScheduler::enqueue`](crate::TransferScheduler::enqueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    pub transfer_id: String,
    pub file_name: String,
    /// Smaller values are serviced sooner.
    pub priority: i32,
    pub is_outgoing: bool,
    pub peer_id: Option<String>,
    pub file_size: Option<u64>,
}

impl EnqueueRequest {
    pub fn new(
        transfer_id: impl Into<String>,
        file_name: impl Into<String>,
        priority: i32,
        is_outgoing: bool,
    ) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            file_name: file_name.into(),
            priority,
            is_outgoing,
            peer_id: None,
            file_size: None,
        }
    }

    pub fn with_peer(mut self, peer_id: impl Into<String>) -> Self {
        self.peer_id = Some(peer_id.into());
        self
    }

    pub fn with_file_size(mut self, file_size: u64) -> Self {
        self.file_size = Some(file_size);
        self
    }
}

/// A queued transfer request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferQueueEntry {
    pub transfer_id: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    pub is_outgoing: bool,
    pub priority: i32,
    pub status: TransferStatus,
    #[serde(default)]
    pub retry_count: u32,
    /// Last failure message; cleared on retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Queue order among equal priorities; renewed when the entry re-enters
    /// the queue.
    pub sequence: u64,
    /// Earliest admission time when retry backoff is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferQueueEntry {
    /// Creates a `Queued` entry.
    pub fn new(request: EnqueueRequest, sequence: u64) -> Self {
        let now = Utc::now();
        Self {
            transfer_id: request.transfer_id,
            file_name: request.file_name,
            file_size: request.file_size,
            peer_id: request.peer_id,
            is_outgoing: request.is_outgoing,
            priority: request.priority,
            status: TransferStatus::Queued,
            retry_count: 0,
            error: None,
            sequence,
            retry_after: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `Failed` with retry budget left under the default [`MAX_RETRIES`].
    pub fn can_retry(&self) -> bool {
        self.can_retry_within(MAX_RETRIES)
    }

    /// `Failed` with fewer than `max_retries` retries used.
    pub fn can_retry_within(&self, max_retries: u32) -> bool {
        self.status == TransferStatus::Failed && self.retry_count < max_retries
    }

    /// `Queued` and not held back by a retry delay.
    pub fn is_admissible(&self, now: DateTime<Utc>) -> bool {
        self.status == TransferStatus::Queued && self.retry_after.is_none_or(|at| at <= now)
    }

    /// Scheduling order: ascending priority, then queue order.
    pub fn queue_key(&self) -> (i32, u64) {
        (self.priority, self.sequence)
    }

    pub(crate) fn admit(&mut self) {
        self.status = TransferStatus::Transferring;
        self.retry_after = None;
        self.touch();
    }

    pub(crate) fn complete(&mut self) {
        self.status = TransferStatus::Completed;
        self.error = None;
        self.touch();
    }

    pub(crate) fn fail(&mut self, error: String) {
        self.status = TransferStatus::Failed;
        self.error = Some(error);
        self.touch();
    }

    pub(crate) fn requeue_for_retry(&mut self, sequence: u64, retry_after: Option<DateTime<Utc>>) {
        self.status = TransferStatus::Queued;
        self.retry_count += 1;
        self.error = None;
        self.sequence = sequence;
        self.retry_after = retry_after;
        self.touch();
    }

    /// Back to `Queued` after the process running it went away. Sequence and
    /// retry count are kept.
    pub(crate) fn interrupt(&mut self) {
        self.status = TransferStatus::Queued;
        self.retry_after = None;
        self.touch();
    }

    pub(crate) fn pause(&mut self) {
        self.status = TransferStatus::Paused;
        self.touch();
    }

    pub(crate) fn resume(&mut self, sequence: u64) {
        self.status = TransferStatus::Queued;
        self.sequence = sequence;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> TransferQueueEntry {
        TransferQueueEntry::new(
            EnqueueRequest::new("t1", "doc.pdf", 5, true)
                .with_peer("peer-a")
                .with_file_size(2048),
            1,
        )
    }

    #[test]
    fn new_entry_is_queued() {
        let e = entry();
        assert_eq!(e.status, TransferStatus::Queued);
        assert_eq!(e.retry_count, 0);
        assert!(e.error.is_none());
        assert_eq!(e.peer_id.as_deref(), Some("peer-a"));
        assert_eq!(e.file_size, Some(2048));
        assert!(!e.can_retry());
    }

    #[test]
    fn can_retry_only_when_failed_with_budget() {
        let mut e = entry();
        e.fail("peer went away".into());
        assert!(e.can_retry());

        e.retry_count = MAX_RETRIES;
        assert!(!e.can_retry());
        assert!(e.can_retry_within(MAX_RETRIES + 1));

        e.retry_count = 0;
        e.complete();
        assert!(!e.can_retry());
    }

    #[test]
    fn retry_clears_error_and_counts() {
        let mut e = entry();
        e.admit();
        e.fail("timeout".into());
        e.requeue_for_retry(9, None);
        assert_eq!(e.status, TransferStatus::Queued);
        assert_eq!(e.retry_count, 1);
        assert!(e.error.is_none());
        assert_eq!(e.sequence, 9);
    }

    #[test]
    fn retry_delay_blocks_admission_until_due() {
        let mut e = entry();
        e.fail("timeout".into());
        let now = Utc::now();
        e.requeue_for_retry(2, Some(now + chrono::Duration::seconds(30)));
        assert!(!e.is_admissible(now));
        assert!(e.is_admissible(now + chrono::Duration::seconds(31)));
    }

    #[test]
    fn interrupted_keeps_queue_position() {
        let mut e = entry();
        e.admit();
        e.interrupt();
        assert_eq!(e.status, TransferStatus::Queued);
        assert_eq!(e.queue_key(), (5, 1));
        assert_eq!(e.retry_count, 0);
        assert!(e.is_admissible(Utc::now()));
    }

    #[test]
    fn paused_is_not_admissible() {
        let mut e = entry();
        e.pause();
        assert!(!e.is_admissible(Utc::now()));
        e.resume(7);
        assert!(e.is_admissible(Utc::now()));
        assert_eq!(e.queue_key(), (5, 7));
    }

    #[test]
    fn json_field_names() {
        let json = serde_json::to_value(entry()).unwrap();
        assert_eq!(json["transferId"], "t1");
        assert_eq!(json["isOutgoing"], true);
        assert_eq!(json["status"], "queued");
        assert!(json.get("error").is_none());
        assert!(json.get("retryAfter").is_none());
    }
}
