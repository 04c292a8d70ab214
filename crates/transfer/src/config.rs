use serde::{Deserialize, Serialize};

use peerdrop_protocol::{CHECKPOINT_PERSIST_INTERVAL, CHECKPOINT_RETENTION_DAYS};

/// Checkpoint persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Write a live checkpoint to the store every N-th chunk update.
    /// `1` persists every update; `0` is treated as `1`.
    #[serde(default = "default_persist_interval")]
    pub persist_interval: u32,

    /// Days after the last update before a checkpoint is reaped.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_persist_interval() -> u32 {
    CHECKPOINT_PERSIST_INTERVAL
}

fn default_retention_days() -> u32 {
    CHECKPOINT_RETENTION_DAYS
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            persist_interval: default_persist_interval(),
            retention_days: default_retention_days(),
        }
    }
}

impl CheckpointConfig {
    /// Retention window as a chrono duration.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    pub(crate) fn effective_interval(&self) -> u32 {
        self.persist_interval.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CheckpointConfig::default();
        assert_eq!(config.persist_interval, 10);
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.retention(), chrono::Duration::days(7));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: CheckpointConfig = serde_json::from_str(r#"{"retention_days":3}"#).unwrap();
        assert_eq!(config.persist_interval, 10);
        assert_eq!(config.retention_days, 3);
    }

    #[test]
    fn zero_interval_persists_every_update() {
        let config = CheckpointConfig {
            persist_interval: 0,
            ..CheckpointConfig::default()
        };
        assert_eq!(config.effective_interval(), 1);
    }
}
