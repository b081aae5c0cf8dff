// src/collector/oom_table.rs

use super::Collector;
use crate::config::{AppConfig, CollectorConfig};
use crate::enrich;
use crate::event_bus::ProbeEvent;
use crate::publisher::Publisher;
use crate::report::OomReport;
use crate::table::TableDrain;
use async_trait::async_trait;
use chrono::Utc;
use oomwatch_common::{OomEvent, OOM_EVENTS_MAX_ENTRIES};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// What a single pass over the table did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollStats {
    pub listed: usize,
    pub reported: usize,
    pub unchanged: usize,
    pub vanished: usize,
    pub drained: usize,
    pub failed: usize,
}

/// Polls the probe's table, publishes a report per new or changed entry and
/// deletes drained keys.
pub struct OomTableCollector<T> {
    table: T,
    app_config: Arc<RwLock<AppConfig>>,
    event_tx: broadcast::Sender<ProbeEvent>,
    shutdown_flag: Arc<AtomicBool>,
    // last record published per live key, so undrained entries are not
    // reported again until the probe overwrites them
    last_reported: HashMap<u32, OomEvent>,
    // last key handled by a poll that hit `max_batch`; the next poll resumes
    // after it so a bounded batch still visits every key
    resume_after: Option<u32>,
    capacity_warned: bool,
}

impl<T: TableDrain> OomTableCollector<T> {
    pub fn new(
        table: T,
        app_config: Arc<RwLock<AppConfig>>,
        event_tx: broadcast::Sender<ProbeEvent>,
    ) -> Self {
        Self {
            table,
            app_config,
            event_tx,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            last_reported: HashMap::new(),
            resume_after: None,
            capacity_warned: false,
        }
    }

    /// Setting the flag stops `run` within one poll interval.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_flag)
    }

    async fn settings(&self) -> CollectorConfig {
        self.app_config.read().await.collector.clone()
    }

    pub async fn poll_once(&mut self) -> PollStats {
        let settings = self.settings().await;
        let mut stats = PollStats::default();

        let mut pids = match self.table.pending_pids() {
            Ok(pids) => pids,
            Err(e) => {
                warn!("[OomTable] Failed to list table keys: {:#}", e);
                return stats;
            }
        };
        stats.listed = pids.len();

        let live: HashSet<u32> = pids.iter().copied().collect();
        self.last_reported.retain(|pid, _| live.contains(pid));
        self.check_capacity(live.len(), &settings);

        pids.sort_unstable();
        let start = self
            .resume_after
            .map(|last| pids.partition_point(|&pid| pid <= last))
            .unwrap_or(0);
        pids.rotate_left(start);
        pids.truncate(settings.max_batch);
        self.resume_after = if pids.len() < stats.listed {
            pids.last().copied()
        } else {
            None
        };

        for pid in pids {
            let event = match self.table.read(pid) {
                Ok(Some(event)) => event,
                Ok(None) => {
                    debug!("[OomTable] pid {} vanished before it could be read", pid);
                    stats.vanished += 1;
                    continue;
                }
                Err(e) => {
                    warn!("[OomTable] {:#}", e);
                    stats.failed += 1;
                    continue;
                }
            };

            if self.last_reported.get(&pid) == Some(&event) {
                stats.unchanged += 1;
            } else {
                self.report(pid, &event, &settings).await;
                self.last_reported.insert(pid, event);
                stats.reported += 1;
            }

            if settings.drain {
                match self.table.delete(pid) {
                    Ok(()) => {
                        self.last_reported.remove(&pid);
                        stats.drained += 1;
                    }
                    Err(e) => {
                        warn!("[OomTable] {:#}; retrying on the next poll", e);
                        stats.failed += 1;
                    }
                }
            }
        }

        if stats.reported > 0 || stats.failed > 0 {
            debug!("[OomTable] poll finished: {:?}", stats);
        }
        stats
    }

    async fn report(&self, pid: u32, event: &OomEvent, settings: &CollectorConfig) {
        let mut report = OomReport::from_entry(pid, event, Utc::now());

        if settings.enrich && report.complete {
            let comm = report.comm.clone();
            report.process = tokio::task::spawn_blocking(move || enrich::lookup_process(pid, &comm))
                .await
                .unwrap_or_else(|e| {
                    warn!("[OomTable] enrichment task for pid {} failed: {}", pid, e);
                    None
                });
        }

        if let Err(e) = self.publish(ProbeEvent::OomCaptured(report)) {
            warn!(
                "[OomTable] No subscriber for capture of pid {}: {}",
                pid, e
            );
        }
    }

    fn check_capacity(&mut self, live: usize, settings: &CollectorConfig) {
        let threshold = settings.capacity_warn_threshold();
        if live < threshold {
            self.capacity_warned = false;
            return;
        }
        if self.capacity_warned {
            return;
        }
        self.capacity_warned = true;
        let event = ProbeEvent::TableNearCapacity {
            live,
            capacity: OOM_EVENTS_MAX_ENTRIES as usize,
        };
        if let Err(e) = self.publish(event) {
            warn!("[OomTable] No subscriber for capacity warning: {}", e);
        }
    }
}

#[async_trait]
impl<T> Collector for OomTableCollector<T>
where
    T: TableDrain + Send + Sync + 'static,
{
    async fn run(mut self) {
        info!("[OomTable] Collector started.");
        while !self.shutdown_flag.load(Ordering::SeqCst) {
            self.poll_once().await;
            let interval = self.settings().await.poll_interval_ms.max(10);
            tokio::time::sleep(Duration::from_millis(interval)).await;
        }
        // pick up anything captured since the last pass
        let stats = self.poll_once().await;
        info!(
            "[OomTable] Collector stopped after a final pass ({} reported).",
            stats.reported
        );
    }

    fn name(&self) -> String {
        "OomTableCollector".to_string()
    }
}

impl<T> Publisher for OomTableCollector<T> {
    fn publish(
        &self,
        event: ProbeEvent,
    ) -> Result<usize, broadcast::error::SendError<ProbeEvent>> {
        self.event_tx.send(event)
    }
}
