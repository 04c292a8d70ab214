//! Admission control over a bounded pool of active transfers.
//!
//! Every transition that can change the number of `Transferring` entries runs
//! under one async admission lock, so concurrent callers never admit into the
//! same slot. Transport calls happen after the lock is released; a transport
//! may call straight back into the scheduler.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use peerdrop_protocol::{QueueStats, TransferStatus};
use peerdrop_store::validate_key;

use crate::{
    EnqueueRequest, QueueStore, SchedulerConfig, SchedulerError, SchedulerEvent,
    TransferQueueEntry, TransportManager,
};

const EVENT_BUFFER: usize = 256;

struct AdmissionState {
    /// `None` until seeded from the highest persisted sequence.
    last_sequence: Option<u64>,
}

/// Priority transfer queue with a concurrency ceiling and bounded retry.
pub struct TransferScheduler {
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn TransportManager>,
    config: SchedulerConfig,
    admission: Mutex<AdmissionState>,
    events_tx: mpsc::Sender<SchedulerEvent>,
    events_rx: Option<mpsc::Receiver<SchedulerEvent>>,
}

impl TransferScheduler {
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn TransportManager>,
        config: SchedulerConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            store,
            transport,
            config,
            admission: Mutex::new(AdmissionState {
                last_sequence: None,
            }),
            events_tx: tx,
            events_rx: Some(rx),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SchedulerEvent>> {
        self.events_rx.take()
    }

    fn emit(&self, event: SchedulerEvent) {
        let _ = self.events_tx.try_send(event);
    }

    /// Strictly increasing queue order. Tracks wall-clock microseconds but
    /// never falls below the highest sequence already in the store, so order
    /// holds across restarts even if the clock went backwards.
    async fn next_sequence(&self, state: &mut AdmissionState) -> Result<u64, SchedulerError> {
        let last = match state.last_sequence {
            Some(last) => last,
            None => {
                let persisted = self.store.list().await?;
                persisted.iter().map(|e| e.sequence).max().unwrap_or(0)
            }
        };
        let now = u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0);
        let next = now.max(last + 1);
        state.last_sequence = Some(next);
        Ok(next)
    }

    /// Adds a `Queued` entry. Does not admit it; call
    /// [`schedule_next`](Self::schedule_next) for that.
    pub async fn enqueue(
        &self,
        request: EnqueueRequest,
    ) -> Result<TransferQueueEntry, SchedulerError> {
        validate_key(&request.transfer_id)
            .map_err(|_| SchedulerError::InvalidTransferId(request.transfer_id.clone()))?;

        let entry = {
            let mut state = self.admission.lock().await;
            if self.store.get(&request.transfer_id).await?.is_some() {
                return Err(SchedulerError::AlreadyQueued(request.transfer_id));
            }
            let sequence = self.next_sequence(&mut state).await?;
            let entry = TransferQueueEntry::new(request, sequence);
            self.store.save(&entry).await?;
            entry
        };

        info!(
            transfer = %entry.transfer_id,
            file = %entry.file_name,
            priority = entry.priority,
            outgoing = entry.is_outgoing,
            "transfer enqueued"
        );
        self.emit(SchedulerEvent::Enqueued {
            transfer_id: entry.transfer_id.clone(),
            priority: entry.priority,
        });
        Ok(entry)
    }

    /// Fills free slots with the best queued entries and starts them.
    ///
    /// Returns the entries started by this call, in start order. An entry the
    /// transport refuses to start is marked `Failed` and left out; its slot is
    /// not refilled until the next call.
    pub async fn schedule_next(&self) -> Result<Vec<TransferQueueEntry>, SchedulerError> {
        let admitted = self.admit_available().await?;

        let mut started = Vec::with_capacity(admitted.len());
        let mut first_error = None;
        for entry in admitted {
            info!(
                transfer = %entry.transfer_id,
                priority = entry.priority,
                retry_count = entry.retry_count,
                "transfer admitted"
            );
            self.emit(SchedulerEvent::Admitted {
                transfer_id: entry.transfer_id.clone(),
            });

            match self.transport.start_transfer(&entry).await {
                Ok(()) => started.push(entry),
                Err(e) => {
                    warn!(
                        transfer = %entry.transfer_id,
                        error = %e,
                        "transport failed to start transfer"
                    );
                    match self.mark_failed(&entry.transfer_id, &e.to_string()).await {
                        Ok(_)
                        | Err(SchedulerError::NotFound(_))
                        | Err(SchedulerError::InvalidTransition { .. }) => {}
                        Err(err) => {
                            first_error.get_or_insert(err);
                        }
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(started),
        }
    }

    async fn admit_available(&self) -> Result<Vec<TransferQueueEntry>, SchedulerError> {
        let _state = self.admission.lock().await;

        let transferring = self
            .store
            .count_by_status(TransferStatus::Transferring)
            .await?;
        let available = self
            .config
            .max_concurrent_transfers
            .saturating_sub(transferring);
        if available == 0 {
            debug!(transferring, "no free transfer slots");
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let candidates: Vec<_> = self
            .store
            .queued_by_priority()
            .await?
            .into_iter()
            .filter(|e| e.is_admissible(now))
            .take(available)
            .collect();

        let mut admitted = Vec::with_capacity(candidates.len());
        for mut entry in candidates {
            entry.admit();
            self.store.save(&entry).await?;
            admitted.push(entry);
        }
        Ok(admitted)
    }

    /// Requeues a failed transfer if its retry budget allows.
    ///
    /// Does not admit it; the next [`schedule_next`](Self::schedule_next)
    /// does. With backoff enabled the entry waits out its delay first.
    pub async fn retry_transfer(
        &self,
        transfer_id: &str,
    ) -> Result<TransferQueueEntry, SchedulerError> {
        let entry = {
            let mut state = self.admission.lock().await;
            let mut entry = self.require(transfer_id).await?;
            if !entry.can_retry_within(self.config.max_retries) {
                return Err(SchedulerError::NotRetryable {
                    transfer_id: transfer_id.to_string(),
                    status: entry.status,
                    retry_count: entry.retry_count,
                    max_retries: self.config.max_retries,
                });
            }
            let retry_after = self
                .config
                .retry_backoff
                .next_attempt_at(entry.retry_count + 1, Utc::now());
            let sequence = self.next_sequence(&mut state).await?;
            entry.requeue_for_retry(sequence, retry_after);
            self.store.save(&entry).await?;
            entry
        };

        info!(
            transfer = %transfer_id,
            retry_count = entry.retry_count,
            max_retries = self.config.max_retries,
            retry_after = ?entry.retry_after,
            "transfer requeued for retry"
        );
        self.emit(SchedulerEvent::Retrying {
            transfer_id: transfer_id.to_string(),
            attempt: entry.retry_count,
        });
        Ok(entry)
    }

    /// Holds a queued or running transfer. A running one is stopped and its
    /// slot backfilled.
    pub async fn pause_transfer(&self, transfer_id: &str) -> Result<(), SchedulerError> {
        let was_active = {
            let _state = self.admission.lock().await;
            let mut entry = self.require(transfer_id).await?;
            let was_active = match entry.status {
                TransferStatus::Queued => false,
                TransferStatus::Transferring => true,
                from => {
                    return Err(SchedulerError::InvalidTransition {
                        transfer_id: transfer_id.to_string(),
                        from,
                        action: "pause",
                    });
                }
            };
            entry.pause();
            self.store.save(&entry).await?;
            was_active
        };

        info!(transfer = %transfer_id, was_active, "transfer paused");
        self.emit(SchedulerEvent::Paused {
            transfer_id: transfer_id.to_string(),
        });

        if was_active {
            self.transport.stop_transfer(transfer_id).await;
            self.schedule_next().await?;
        }
        Ok(())
    }

    /// Returns a paused transfer to the queue and schedules immediately.
    pub async fn resume_transfer(&self, transfer_id: &str) -> Result<(), SchedulerError> {
        {
            let mut state = self.admission.lock().await;
            let mut entry = self.require(transfer_id).await?;
            if entry.status != TransferStatus::Paused {
                return Err(SchedulerError::InvalidTransition {
                    transfer_id: transfer_id.to_string(),
                    from: entry.status,
                    action: "resume",
                });
            }
            let sequence = self.next_sequence(&mut state).await?;
            entry.resume(sequence);
            self.store.save(&entry).await?;
        }

        info!(transfer = %transfer_id, "transfer resumed");
        self.emit(SchedulerEvent::Resumed {
            transfer_id: transfer_id.to_string(),
        });
        self.schedule_next().await?;
        Ok(())
    }

    /// Removes an entry in any state. A running transfer is stopped and its
    /// slot backfilled.
    pub async fn cancel_transfer(&self, transfer_id: &str) -> Result<(), SchedulerError> {
        let was_active = {
            let _state = self.admission.lock().await;
            let entry = self.require(transfer_id).await?;
            self.store.delete(transfer_id).await?;
            entry.status == TransferStatus::Transferring
        };

        info!(transfer = %transfer_id, was_active, "transfer cancelled");
        self.emit(SchedulerEvent::Cancelled {
            transfer_id: transfer_id.to_string(),
            was_active,
        });

        if was_active {
            self.transport.stop_transfer(transfer_id).await;
            self.schedule_next().await?;
        }
        Ok(())
    }

    /// Records a successful transfer without backfilling. Only a
    /// `Transferring` entry can complete.
    pub async fn mark_completed(
        &self,
        transfer_id: &str,
    ) -> Result<TransferQueueEntry, SchedulerError> {
        let entry = {
            let _state = self.admission.lock().await;
            let mut entry = self.require_transferring(transfer_id, "complete").await?;
            entry.complete();
            self.store.save(&entry).await?;
            entry
        };

        info!(transfer = %transfer_id, file = %entry.file_name, "transfer completed");
        self.emit(SchedulerEvent::Completed {
            transfer_id: transfer_id.to_string(),
        });
        Ok(entry)
    }

    /// Records a failed transfer without retrying or backfilling. Only a
    /// `Transferring` entry can fail.
    pub async fn mark_failed(
        &self,
        transfer_id: &str,
        error: &str,
    ) -> Result<TransferQueueEntry, SchedulerError> {
        let entry = {
            let _state = self.admission.lock().await;
            let mut entry = self.require_transferring(transfer_id, "fail").await?;
            entry.fail(error.to_string());
            self.store.save(&entry).await?;
            entry
        };

        let can_retry = entry.can_retry_within(self.config.max_retries);
        warn!(
            transfer = %transfer_id,
            error,
            retry_count = entry.retry_count,
            can_retry,
            "transfer failed"
        );
        self.emit(SchedulerEvent::Failed {
            transfer_id: transfer_id.to_string(),
            error: error.to_string(),
            retry_count: entry.retry_count,
            can_retry,
        });
        Ok(entry)
    }

    /// Transport callback: marks the transfer completed and backfills the
    /// freed slot. A report for an entry that was cancelled or paused
    /// mid-flight is logged and ignored.
    pub async fn on_transfer_complete(
        &self,
        transfer_id: &str,
    ) -> Result<Vec<TransferQueueEntry>, SchedulerError> {
        match self.mark_completed(transfer_id).await {
            Ok(_) => {}
            Err(SchedulerError::NotFound(_)) => {
                warn!(transfer = %transfer_id, "completion reported for unknown transfer");
            }
            Err(SchedulerError::InvalidTransition { from, .. }) => {
                warn!(transfer = %transfer_id, status = %from, "late completion ignored");
            }
            Err(e) => return Err(e),
        }
        self.schedule_next().await
    }

    /// Transport callback: marks the transfer failed, requeues it when
    /// `auto_retry` is on and budget remains, then backfills. Reports for
    /// entries no longer `Transferring` are logged and ignored.
    pub async fn on_transfer_failed(
        &self,
        transfer_id: &str,
        error: &str,
    ) -> Result<Vec<TransferQueueEntry>, SchedulerError> {
        match self.mark_failed(transfer_id, error).await {
            Ok(entry) => {
                if self.config.auto_retry && entry.can_retry_within(self.config.max_retries) {
                    match self.retry_transfer(transfer_id).await {
                        Ok(_) | Err(SchedulerError::NotFound(_)) => {}
                        Err(SchedulerError::NotRetryable { .. }) => {
                            debug!(transfer = %transfer_id, "entry changed before auto retry");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            Err(SchedulerError::NotFound(_)) => {
                warn!(transfer = %transfer_id, "failure reported for unknown transfer");
            }
            Err(SchedulerError::InvalidTransition { from, .. }) => {
                warn!(transfer = %transfer_id, status = %from, "late failure ignored");
            }
            Err(e) => return Err(e),
        }
        self.schedule_next().await
    }

    /// Returns entries left `Transferring` by a previous process to the
    /// queue, keeping their place. Call once at startup before the transport
    /// starts anything; every such entry is orphaned by then.
    pub async fn recover_interrupted(&self) -> Result<Vec<TransferQueueEntry>, SchedulerError> {
        let recovered = {
            let _state = self.admission.lock().await;
            let mut recovered = Vec::new();
            for mut entry in self.store.list().await? {
                if entry.status != TransferStatus::Transferring {
                    continue;
                }
                entry.interrupt();
                self.store.save(&entry).await?;
                recovered.push(entry);
            }
            recovered
        };

        for entry in &recovered {
            info!(transfer = %entry.transfer_id, "interrupted transfer requeued");
            self.emit(SchedulerEvent::Interrupted {
                transfer_id: entry.transfer_id.clone(),
            });
        }
        Ok(recovered)
    }

    /// Removes every `Completed` entry.
    pub async fn clear_completed(&self) -> Result<usize, SchedulerError> {
        self.clear(TransferStatus::Completed).await
    }

    /// Removes every `Failed` entry.
    pub async fn clear_failed(&self) -> Result<usize, SchedulerError> {
        self.clear(TransferStatus::Failed).await
    }

    async fn clear(&self, status: TransferStatus) -> Result<usize, SchedulerError> {
        let count = {
            let _state = self.admission.lock().await;
            self.store.delete_by_status(status).await?
        };
        info!(%status, count, "cleared queue entries");
        self.emit(SchedulerEvent::Cleared { status, count });
        Ok(count)
    }

    pub async fn get_queue_stats(&self) -> Result<QueueStats, SchedulerError> {
        let entries = self.store.list().await?;
        let mut stats = QueueStats {
            total_count: entries.len(),
            ..QueueStats::default()
        };
        for entry in &entries {
            match entry.status {
                TransferStatus::Queued => stats.queued_count += 1,
                TransferStatus::Transferring => stats.transferring_count += 1,
                TransferStatus::Paused => stats.paused_count += 1,
                TransferStatus::Completed => stats.completed_count += 1,
                TransferStatus::Failed => stats.failed_count += 1,
            }
        }
        Ok(stats)
    }

    pub async fn get_entry(
        &self,
        transfer_id: &str,
    ) -> Result<Option<TransferQueueEntry>, SchedulerError> {
        Ok(self.store.get(transfer_id).await?)
    }

    /// Every entry in scheduling order.
    pub async fn list_entries(&self) -> Result<Vec<TransferQueueEntry>, SchedulerError> {
        Ok(self.store.list().await?)
    }

    async fn require(&self, transfer_id: &str) -> Result<TransferQueueEntry, SchedulerError> {
        self.store
            .get(transfer_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(transfer_id.to_string()))
    }

    async fn require_transferring(
        &self,
        transfer_id: &str,
        action: &'static str,
    ) -> Result<TransferQueueEntry, SchedulerError> {
        let entry = self.require(transfer_id).await?;
        if entry.status != TransferStatus::Transferring {
            return Err(SchedulerError::InvalidTransition {
                transfer_id: transfer_id.to_string(),
                from: entry.status,
                action,
            });
        }
        Ok(entry)
    }
}
