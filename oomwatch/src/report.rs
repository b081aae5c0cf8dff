//! Decoding of raw probe records into reports.
//!
//! Degradation is carried in the record itself and is never an error here:
//! a negative `user_stack_size` becomes [`StackCapture::Unavailable`] while
//! the other fields stay usable.

use chrono::{DateTime, Utc};
use oomwatch_common::OomEvent;
use serde::{Serialize, Serializer};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OomReport {
    /// Tgid of the task that was executing `oom_kill_process`. This may be
    /// the task whose allocation triggered the kill rather than the victim.
    pub pid: u32,
    /// False when the probe only managed to leave its zeroed placeholder
    /// under this key; `comm`, `cgroup_id` and `stack` are then empty.
    pub complete: bool,
    pub comm: String,
    pub cgroup_id: u32,
    pub stack: StackCapture,
    pub observed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessDetails>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StackCapture {
    /// User-space return addresses, most recent first.
    Frames {
        #[serde(serialize_with = "hex_addresses")]
        addresses: Vec<u64>,
    },
    /// `bpf_get_stack` failed with this errno.
    Unavailable { errno: i32 },
}

/// What could still be learned about the pid when the record was drained.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessDetails {
    pub exe: Option<PathBuf>,
    pub cmdline: Vec<String>,
    pub cgroup_path: Option<String>,
}

fn hex_addresses<S: Serializer>(addresses: &[u64], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(addresses.iter().map(|addr| format!("{:#018x}", addr)))
}

impl StackCapture {
    pub fn from_event(event: &OomEvent) -> Self {
        match event.frames() {
            Some(frames) => StackCapture::Frames {
                addresses: frames.to_vec(),
            },
            None => StackCapture::Unavailable {
                errno: event.user_stack_size,
            },
        }
    }

    pub fn frame_count(&self) -> usize {
        match self {
            StackCapture::Frames { addresses } => addresses.len(),
            StackCapture::Unavailable { .. } => 0,
        }
    }
}

impl OomReport {
    /// Builds a report from the table entry stored under `pid`.
    pub fn from_entry(pid: u32, event: &OomEvent, observed_at: DateTime<Utc>) -> Self {
        Self {
            pid,
            complete: event.pid == pid && pid != 0,
            comm: String::from_utf8_lossy(event.comm_bytes()).into_owned(),
            cgroup_id: event.cgroup_id,
            stack: StackCapture::from_event(event),
            observed_at,
            process: None,
        }
    }

    pub fn to_yaml_document(&self) -> Result<String, serde_yaml::Error> {
        let body = serde_yaml::to_string(self)?;
        Ok(format!("---\n{}", body))
    }
}
