//! Memory cgroup name lookup for the current task.
//!
//! Not wired into the hook yet: records carry the numeric cgroup id only.
//! Kept so a path can be attached to captures once the loader can supply
//! the structure offsets for the running kernel.

use crate::capture::{CurrentTask, FieldReader, EFAULT, EINVAL, ELOOP, ENOENT};
use crate::{ProbeOffsets, OFFSET_UNKNOWN};

pub const MAX_CHAIN_DEPTH: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Link {
    /// `task_struct::cgroups`
    TaskCssSet,
    /// `css_set::subsys[memory_cgrp_id]`
    MemoryCss,
    /// `cgroup_subsys_state::cgroup`
    CssCgroup,
    /// `cgroup::kn`
    CgroupKernfsNode,
    /// `kernfs_node::name`
    KernfsName,
}

const CGROUP_NAME_CHAIN: [Link; 5] = [
    Link::TaskCssSet,
    Link::MemoryCss,
    Link::CssCgroup,
    Link::CgroupKernfsNode,
    Link::KernfsName,
];

const _: () = assert!(CGROUP_NAME_CHAIN.len() <= MAX_CHAIN_DEPTH);

fn known(offset: u32) -> Option<u32> {
    (offset != OFFSET_UNKNOWN).then_some(offset)
}

fn link_offset(link: Link, offsets: &ProbeOffsets) -> Option<u32> {
    match link {
        Link::TaskCssSet => known(offsets.task_cgroups),
        Link::MemoryCss => {
            let slot = offsets.memory_cgrp_id.checked_mul(8)?;
            known(offsets.css_set_subsys)?.checked_add(slot)
        }
        Link::CssCgroup => known(offsets.css_cgroup),
        Link::CgroupKernfsNode => known(offsets.cgroup_kn),
        Link::KernfsName => known(offsets.kernfs_node_name),
    }
}

/// Copies the kernfs name of the current task's memory cgroup into `buf`
/// and returns its length.
///
/// Fails with `-EINVAL` when an offset is unknown, `-ENOENT` on a null link
/// and `-ELOOP` if a link points back into the chain already walked.
pub fn resolve_cgroup_name<E>(env: &E, offsets: &ProbeOffsets, buf: &mut [u8]) -> Result<usize, i64>
where
    E: CurrentTask + FieldReader,
{
    let task = env.task();
    if task == 0 {
        return Err(-EFAULT);
    }

    let mut visited = [0usize; MAX_CHAIN_DEPTH + 1];
    visited[0] = task;
    let mut cursor = task;

    for (depth, link) in CGROUP_NAME_CHAIN.iter().enumerate() {
        let offset = link_offset(*link, offsets).ok_or(-EINVAL)?;
        let next = env.read_ptr(cursor, offset)?;
        if next == 0 {
            return Err(-ENOENT);
        }
        if visited[..=depth].contains(&next) {
            return Err(-ELOOP);
        }
        visited[depth + 1] = next;
        cursor = next;
    }

    env.read_str(cursor, buf)
}
