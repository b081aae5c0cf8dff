use crate::daemon_handler::DaemonConfig;
use oomwatch_common::{ProbeOffsets, OOM_EVENTS_MAX_ENTRIES};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

// top-level config

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Log filter used when `RUST_LOG` is unset, e.g. `debug` or
    /// `oomwatch=trace,aya=warn`.
    pub log_level: Option<String>,
    pub log_directory: Option<PathBuf>,
    pub pid_file_directory: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub offsets: OffsetsConfig,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CollectorConfig {
    /// How often the shared table is scanned.
    pub poll_interval_ms: u64,
    /// Delete entries once they have been reported.
    pub drain: bool,
    /// Upper bound on entries handled per poll.
    pub max_batch: usize,
    /// Attach exe and cmdline of the pid when it is still running.
    pub enrich: bool,
    /// Fraction of table capacity at which a warning is published.
    pub capacity_warn_ratio: f64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            drain: true,
            max_batch: 1024,
            enrich: true,
            capacity_warn_ratio: 0.9,
        }
    }
}

impl CollectorConfig {
    /// Live key count at which the table is considered close to full.
    pub fn capacity_warn_threshold(&self) -> usize {
        let ratio = self.capacity_warn_ratio.clamp(0.0, 1.0);
        (OOM_EVENTS_MAX_ENTRIES as f64 * ratio).ceil() as usize
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    /// Append every report as a YAML document to this file.
    pub path: Option<PathBuf>,
}

/// Per-kernel structure offsets. Unset fields keep the built-in defaults.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct OffsetsConfig {
    pub oom_control_chosen: Option<u32>,
    pub task_cgroups: Option<u32>,
    pub css_set_subsys: Option<u32>,
    pub memory_cgrp_id: Option<u32>,
    pub css_cgroup: Option<u32>,
    pub cgroup_kn: Option<u32>,
    pub kernfs_node_name: Option<u32>,
}

impl OffsetsConfig {
    pub fn to_probe_offsets(&self) -> ProbeOffsets {
        let base = ProbeOffsets::DEFAULT;
        ProbeOffsets {
            oom_control_chosen: self.oom_control_chosen.unwrap_or(base.oom_control_chosen),
            task_cgroups: self.task_cgroups.unwrap_or(base.task_cgroups),
            css_set_subsys: self.css_set_subsys.unwrap_or(base.css_set_subsys),
            memory_cgrp_id: self.memory_cgrp_id.unwrap_or(base.memory_cgrp_id),
            css_cgroup: self.css_cgroup.unwrap_or(base.css_cgroup),
            cgroup_kn: self.cgroup_kn.unwrap_or(base.cgroup_kn),
            kernfs_node_name: self.kernfs_node_name.unwrap_or(base.kernfs_node_name),
        }
    }
}

impl AppConfig {
    pub fn load_from_file(config_file_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let config_content = fs::read_to_string(config_file_path)?;
        let loaded_config = Self::from_yaml(&config_content)?;
        Ok(loaded_config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn to_daemonize_config(&self) -> DaemonConfig {
        let defaults = DaemonConfig::default();
        DaemonConfig {
            pid_file: self
                .pid_file_directory
                .as_ref()
                .map(|dir| dir.join("oomwatch.pid"))
                .unwrap_or(defaults.pid_file),
            log_directory: self
                .log_directory
                .clone()
                .unwrap_or(defaults.log_directory),
            working_dir: self
                .working_directory
                .clone()
                .unwrap_or(defaults.working_dir),
        }
    }
}
