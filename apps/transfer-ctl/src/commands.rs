//! Subcommand execution against the on-disk queue and checkpoints.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, bail};

use peerdrop_protocol::TransferStatus;
use peerdrop_scheduler::{
    FileQueueStore, TransferQueueEntry, TransferScheduler, TransportError, TransportManager,
};
use peerdrop_store::BoxFuture;
use peerdrop_transfer::{
    CheckpointManager, CheckpointStore, FileCheckpointStore, TransferCheckpoint,
};

use crate::cli::Command;
use crate::config::CtlConfig;

/// Transport for offline use: refuses every start, ignores stops.
struct OfflineTransport;

impl TransportManager for OfflineTransport {
    fn start_transfer<'a>(
        &'a self,
        entry: &'a TransferQueueEntry,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            Err(TransportError::Unavailable(format!(
                "peerdrop-ctl cannot start {}",
                entry.transfer_id
            )))
        })
    }

    fn stop_transfer<'a>(&'a self, _transfer_id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// Scheduler and checkpoint manager opened over the data directory.
pub struct Services {
    scheduler: TransferScheduler,
    checkpoints: CheckpointManager,
    checkpoint_store: Arc<FileCheckpointStore>,
}

impl Services {
    pub async fn open(config: &CtlConfig) -> anyhow::Result<Self> {
        let queue = FileQueueStore::open(&config.data_dir)
            .await
            .with_context(|| format!("opening queue in {}", config.data_dir.display()))?;
        let checkpoint_store = Arc::new(
            FileCheckpointStore::open(config.checkpoint_dir())
                .await
                .context("opening checkpoint directory")?,
        );

        Ok(Self {
            scheduler: TransferScheduler::new(
                Arc::new(queue),
                Arc::new(OfflineTransport),
                config.scheduler.clone(),
            ),
            checkpoints: CheckpointManager::new(
                checkpoint_store.clone(),
                config.checkpoints.clone(),
            ),
            checkpoint_store,
        })
    }

    /// Runs one subcommand, writing human-readable output to `out`.
    pub async fn execute(&self, command: &Command, out: &mut impl Write) -> anyhow::Result<()> {
        match command {
            Command::Stats => {
                let stats = self.scheduler.get_queue_stats().await?;
                writeln!(out, "queued:       {}", stats.queued_count)?;
                writeln!(out, "transferring: {}", stats.transferring_count)?;
                writeln!(out, "paused:       {}", stats.paused_count)?;
                writeln!(out, "completed:    {}", stats.completed_count)?;
                writeln!(out, "failed:       {}", stats.failed_count)?;
                writeln!(out, "total:        {}", stats.total_count)?;
            }
            Command::List => {
                let entries = self.scheduler.list_entries().await?;
                if entries.is_empty() {
                    writeln!(out, "queue is empty")?;
                }
                for entry in &entries {
                    write_entry(out, entry)?;
                }
            }
            Command::Checkpoints { all } => {
                let checkpoints = if *all {
                    self.checkpoint_store.list().await?
                } else {
                    self.checkpoints.pending_checkpoints().await?
                };
                if checkpoints.is_empty() {
                    writeln!(out, "no checkpoints")?;
                }
                for checkpoint in &checkpoints {
                    write_checkpoint(out, checkpoint)?;
                }
            }
            Command::Cleanup => {
                let removed = self.checkpoints.cleanup_old_checkpoints().await?;
                writeln!(
                    out,
                    "removed {removed} checkpoint(s) older than {} days",
                    self.checkpoints.config().retention_days
                )?;
            }
            Command::Retry { transfer_id } => {
                let entry = self.scheduler.retry_transfer(transfer_id).await?;
                writeln!(
                    out,
                    "requeued {} (retry {}/{})",
                    entry.transfer_id,
                    entry.retry_count,
                    self.scheduler.config().max_retries
                )?;
            }
            Command::Cancel { transfer_id } => {
                let entry = self
                    .scheduler
                    .get_entry(transfer_id)
                    .await?
                    .with_context(|| format!("transfer not found: {transfer_id}"))?;
                if entry.status == TransferStatus::Transferring {
                    bail!("{transfer_id} is transferring; cancel it from the running host");
                }
                self.scheduler.cancel_transfer(transfer_id).await?;
                writeln!(out, "cancelled {transfer_id}")?;
            }
            Command::Recover => {
                let recovered = self.scheduler.recover_interrupted().await?;
                for entry in &recovered {
                    write_entry(out, entry)?;
                }
                writeln!(out, "requeued {} interrupted transfer(s)", recovered.len())?;
            }
            Command::ClearCompleted => {
                let count = self.scheduler.clear_completed().await?;
                writeln!(out, "cleared {count} completed transfer(s)")?;
            }
            Command::ClearFailed => {
                let count = self.scheduler.clear_failed().await?;
                writeln!(out, "cleared {count} failed transfer(s)")?;
            }
        }
        Ok(())
    }
}

fn write_entry(out: &mut impl Write, entry: &TransferQueueEntry) -> std::io::Result<()> {
    let direction = if entry.is_outgoing { "out" } else { "in" };
    write!(
        out,
        "{:<24} {:<12} p={:<4} retries={} {direction:<3} {}",
        entry.transfer_id,
        entry.status.as_str(),
        entry.priority,
        entry.retry_count,
        entry.file_name
    )?;
    if let Some(error) = &entry.error {
        write!(out, " ({error})")?;
    }
    writeln!(out)
}

fn write_checkpoint(out: &mut impl Write, checkpoint: &TransferCheckpoint) -> std::io::Result<()> {
    let summary = checkpoint.summary();
    writeln!(
        out,
        "{:<24} {:>6.1}% {}/{} chunks {} updated {}",
        summary.transfer_id,
        summary.percentage(),
        summary.received_chunks,
        summary.total_chunks,
        summary.file_name,
        checkpoint.updated_at().format("%Y-%m-%d %H:%M"),
    )
}
