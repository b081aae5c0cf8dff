use crate::config::AppConfig;
use anyhow::{anyhow, Result};
use oomwatch_common::ProbeOffsets;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const WRITE_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

/// What a successful reload changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadOutcome {
    /// The file's offsets differ from the ones the running probe was loaded
    /// with. They only take effect after a restart.
    pub offsets_changed: bool,
}

// loads the config file and swaps it into the shared handle
pub struct ConfigManager {
    config: Arc<RwLock<AppConfig>>,
    config_path: PathBuf,
    // what the running probe was loaded with, not what was last read
    probe_offsets: ProbeOffsets,
}

impl ConfigManager {
    pub fn new(
        config: Arc<RwLock<AppConfig>>,
        config_path: PathBuf,
        probe_offsets: ProbeOffsets,
    ) -> Self {
        Self {
            config,
            config_path,
            probe_offsets,
        }
    }

    pub async fn reload_config(&self) -> Result<ReloadOutcome> {
        info!(
            "ConfigManager: Reloading configuration from {:?}",
            self.config_path
        );
        // parse before locking so readers never wait on IO
        let new_config = match AppConfig::load_from_file(&self.config_path) {
            Ok(config) => config,
            Err(e) => {
                error!("ConfigManager: Failed to reload configuration: {}", e);
                return Err(anyhow!("Failed to reload configuration: {}", e));
            }
        };

        let lock_start = std::time::Instant::now();
        let mut config_guard =
            match tokio::time::timeout(WRITE_LOCK_TIMEOUT, self.config.write()).await {
                Ok(guard) => guard,
                Err(_) => {
                    warn!("ConfigManager: Timeout waiting for write lock, keeping the old configuration.");
                    return Err(anyhow!("Timed out waiting for the configuration write lock"));
                }
            };
        debug!(
            wait_ms = lock_start.elapsed().as_millis() as u64,
            "ConfigManager: Acquired write lock, swapping config"
        );

        let outcome = ReloadOutcome {
            offsets_changed: new_config.offsets.to_probe_offsets() != self.probe_offsets,
        };
        *config_guard = new_config;
        info!("ConfigManager: Configuration reloaded successfully.");
        Ok(outcome)
    }
}
