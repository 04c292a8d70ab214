use serde::{Deserialize, Serialize};

use peerdrop_protocol::{MAX_CONCURRENT_TRANSFERS, MAX_RETRIES};

use crate::RetryPolicy;

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Ceiling on simultaneously `Transferring` entries.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,

    /// Retry budget per transfer.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Requeue failed transfers automatically while budget remains.
    #[serde(default)]
    pub auto_retry: bool,

    #[serde(default)]
    pub retry_backoff: RetryPolicy,
}

fn default_max_concurrent() -> usize {
    MAX_CONCURRENT_TRANSFERS
}

fn default_max_retries() -> u32 {
    MAX_RETRIES
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: default_max_concurrent(),
            max_retries: default_max_retries(),
            auto_retry: false,
            retry_backoff: RetryPolicy::default(),
        }
    }
}
