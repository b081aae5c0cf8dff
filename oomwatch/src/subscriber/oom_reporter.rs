use super::Subscriber;
use crate::config::AppConfig;
use crate::event_bus::ProbeEvent;
use crate::report::{OomReport, StackCapture};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

/// Turns captured records into log lines and, when configured, an
/// append-only YAML report file.
pub struct OomReporter {
    pub event_rx: broadcast::Receiver<ProbeEvent>,
    pub app_config: Arc<RwLock<AppConfig>>,
}

impl OomReporter {
    pub fn new(rx: broadcast::Receiver<ProbeEvent>, config: Arc<RwLock<AppConfig>>) -> Self {
        Self {
            event_rx: rx,
            app_config: config,
        }
    }

    async fn report_path(&self) -> Option<PathBuf> {
        match tokio::time::timeout(std::time::Duration::from_secs(5), self.app_config.read()).await
        {
            Ok(guard) => guard.report.path.clone(),
            Err(_) => {
                warn!(
                    target: "oom_event",
                    "Failed to acquire config lock within timeout, skipping report file."
                );
                None
            }
        }
    }

    fn log_capture(report: &OomReport) {
        let top_frame = match &report.stack {
            StackCapture::Frames { addresses } => addresses
                .first()
                .map(|addr| format!("{:#x}", addr))
                .unwrap_or_default(),
            StackCapture::Unavailable { errno } => format!("errno {}", errno),
        };
        warn!(
            target: "oom_event",
            pid = report.pid,
            comm = %report.comm,
            cgroup_id = report.cgroup_id,
            frames = report.stack.frame_count(),
            top_frame = %top_frame,
            complete = report.complete,
            "oom_kill_process observed in pid {} ({})",
            report.pid,
            report.comm
        );
        if let Some(process) = &report.process {
            debug!(
                target: "oom_event",
                pid = report.pid,
                exe = ?process.exe,
                cgroup_path = ?process.cgroup_path,
                "cmdline: {}",
                process.cmdline.join(" ")
            );
        }
    }

    async fn append_report(path: &Path, report: &OomReport) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let document = report
            .to_yaml_document()
            .context("Failed to serialize report")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(document.as_bytes())
            .await
            .with_context(|| format!("Failed to append to {}", path.display()))?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Subscriber for OomReporter {
    async fn handle_event(&mut self, event: ProbeEvent) {
        match event {
            ProbeEvent::OomCaptured(report) => {
                Self::log_capture(&report);
                if let Some(path) = self.report_path().await {
                    if let Err(e) = Self::append_report(&path, &report).await {
                        warn!(target: "oom_event", pid = report.pid, "{:#}", e);
                    }
                }
            }
            ProbeEvent::TableNearCapacity { live, capacity } => {
                warn!(
                    target: "oom_event",
                    live,
                    capacity,
                    "OOM_EVENTS holds {} of {} entries; new pids will be dropped once it is full",
                    live,
                    capacity
                );
            }
        }
    }
}
