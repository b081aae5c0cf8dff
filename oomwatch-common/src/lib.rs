#![no_std]

#[cfg(test)]
extern crate std;

pub mod capture;
pub mod cgroup;
#[cfg(test)]
mod test_support;

pub use capture::{
    on_oom_kill, record_event, BuildOutcome, CurrentTask, EventTable, FieldReader, HookOutcome,
    StackSampler,
};
pub use cgroup::resolve_cgroup_name;

pub const TASK_COMM_LEN: usize = 16;
pub const MAX_STACK_FRAMES: usize = 50;
pub const OOM_EVENTS_MAX_ENTRIES: u32 = 1024 * 16;

/// Name of the pid-keyed hash map the probe writes into.
pub const OOM_EVENTS_MAP: &str = "OOM_EVENTS";
/// Name of the read-only global holding [`ProbeOffsets`].
pub const OFFSETS_GLOBAL: &str = "OFFSETS";

/// One capture taken when the OOM killer reaches `oom_kill_process`.
///
/// The layout is shared with the user-space consumer and must not change
/// without updating it: `pid` at 0, `comm` at 4, `cgroup_id` at 20,
/// `user_stack_size` at 24, four bytes of padding, `user_stack` at 32.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OomEvent {
    /// Tgid of the task executing the kill decision. This is the task that
    /// ran into memory pressure, which is not necessarily the victim the
    /// killer chose.
    pub pid: u32,
    pub comm: [u8; TASK_COMM_LEN],
    /// Low 32 bits of the kernel's cgroup id.
    pub cgroup_id: u32,
    /// Number of valid frames in `user_stack`, or a negative errno when the
    /// stack could not be captured.
    pub user_stack_size: i32,
    pub user_stack: [u64; MAX_STACK_FRAMES],
}

const _: () = assert!(core::mem::size_of::<OomEvent>() == 432);

impl OomEvent {
    pub const EMPTY: OomEvent = OomEvent {
        pid: 0,
        comm: [0; TASK_COMM_LEN],
        cgroup_id: 0,
        user_stack_size: 0,
        user_stack: [0; MAX_STACK_FRAMES],
    };

    /// Valid stack frames, most recent first. `None` when capture failed.
    pub fn frames(&self) -> Option<&[u64]> {
        if self.user_stack_size < 0 {
            return None;
        }
        let len = (self.user_stack_size as usize).min(MAX_STACK_FRAMES);
        Some(&self.user_stack[..len])
    }

    /// Command name bytes up to the first NUL.
    pub fn comm_bytes(&self) -> &[u8] {
        let end = self
            .comm
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TASK_COMM_LEN);
        &self.comm[..end]
    }
}

impl Default for OomEvent {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for OomEvent {}

/// Marks an offset the loader could not determine for the running kernel.
pub const OFFSET_UNKNOWN: u32 = u32::MAX;

/// Byte offsets into kernel structures, patched into the probe before load.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeOffsets {
    /// `struct oom_control::chosen`
    pub oom_control_chosen: u32,
    /// `struct task_struct::cgroups`
    pub task_cgroups: u32,
    /// `struct css_set::subsys`
    pub css_set_subsys: u32,
    /// Index of the memory controller in `css_set::subsys`.
    pub memory_cgrp_id: u32,
    /// `struct cgroup_subsys_state::cgroup`
    pub css_cgroup: u32,
    /// `struct cgroup::kn`
    pub cgroup_kn: u32,
    /// `struct kernfs_node::name`
    pub kernfs_node_name: u32,
}

impl ProbeOffsets {
    pub const DEFAULT: ProbeOffsets = ProbeOffsets {
        // zonelist, nodemask, memcg, gfp_mask + order, totalpages
        oom_control_chosen: 40,
        task_cgroups: OFFSET_UNKNOWN,
        css_set_subsys: OFFSET_UNKNOWN,
        memory_cgrp_id: 4,
        css_cgroup: 0,
        cgroup_kn: OFFSET_UNKNOWN,
        kernfs_node_name: OFFSET_UNKNOWN,
    };
}

impl Default for ProbeOffsets {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for ProbeOffsets {}
