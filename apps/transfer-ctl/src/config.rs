//! `peerdrop.toml` loading.
//!
//! ```toml
//! data_dir = "/var/lib/peerdrop"
//!
//! [checkpoints]
//! persist_interval = 10
//! retention_days = 7
//!
//! [scheduler]
//! max_concurrent_transfers = 3
//! max_retries = 3
//! auto_retry = false
//!
//! [scheduler.retry_backoff]
//! enabled = false
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use peerdrop_scheduler::SchedulerConfig;
use peerdrop_transfer::CheckpointConfig;

const APP_DIR: &str = "peerdrop";
const CONFIG_FILE: &str = "peerdrop.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CtlConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub checkpoints: CheckpointConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for CtlConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            checkpoints: CheckpointConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl CtlConfig {
    /// Loads `path`, or the default config file when `None`.
    ///
    /// A missing file yields defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path(),
        };

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };

        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(
            path = %path.display(),
            data_dir = %config.data_dir.display(),
            "config loaded"
        );
        Ok(config)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }
}

fn default_config_path() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
        .join(APP_DIR)
        .join(CONFIG_FILE)
}

fn default_data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share").join(APP_DIR)
}

fn xdg_dir(var: &str, home_fallback: &str) -> PathBuf {
    if let Some(dir) = std::env::var_os(var).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(home_fallback)
}
