//! Host stand-ins for the BPF helpers and the kernel hash map.

use crate::capture::{CurrentTask, EventTable, FieldReader, StackSampler, EFAULT};
use crate::{OomEvent, MAX_STACK_FRAMES, TASK_COMM_LEN};
use core::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::vec::Vec;

pub const FAKE_TASK: usize = 0xffff_8880_0300_0000;

/// A current task plus a sparse, word-addressed view of kernel memory.
/// Unmapped addresses fault like a failed `bpf_probe_read_kernel`.
pub struct FakeKernel {
    pub pid: u32,
    pub comm: [u8; TASK_COMM_LEN],
    pub cgroup: u64,
    pub stack: Result<Vec<u64>, i32>,
    memory: BTreeMap<usize, u64>,
    strings: BTreeMap<usize, Vec<u8>>,
}

impl FakeKernel {
    pub fn new(pid: u32, comm: &str) -> Self {
        let mut kernel = Self {
            pid,
            comm: [0; TASK_COMM_LEN],
            cgroup: 1,
            stack: Ok(Vec::new()),
            memory: BTreeMap::new(),
            strings: BTreeMap::new(),
        };
        kernel.set_comm(comm);
        kernel
    }

    /// Same truncation as the kernel's `get_task_comm`.
    pub fn set_comm(&mut self, comm: &str) {
        self.comm = [0; TASK_COMM_LEN];
        let len = comm.len().min(TASK_COMM_LEN - 1);
        self.comm[..len].copy_from_slice(&comm.as_bytes()[..len]);
    }

    pub fn poke(&mut self, addr: usize, value: u64) {
        self.memory.insert(addr, value);
    }

    pub fn poke_str(&mut self, addr: usize, value: &str) {
        self.strings.insert(addr, value.as_bytes().to_vec());
    }
}

impl FieldReader for FakeKernel {
    fn read_u64(&self, addr: usize) -> Result<u64, i64> {
        if addr == 0 {
            return Err(-EFAULT);
        }
        // mapped but never written memory reads as zero
        Ok(self.memory.get(&addr).copied().unwrap_or(0))
    }

    fn read_str(&self, addr: usize, buf: &mut [u8]) -> Result<usize, i64> {
        let src = self.strings.get(&addr).ok_or(-EFAULT)?;
        if buf.is_empty() {
            return Err(-EFAULT);
        }
        let len = src.len().min(buf.len() - 1);
        buf[..len].copy_from_slice(&src[..len]);
        buf[len] = 0;
        Ok(len)
    }
}

impl StackSampler for FakeKernel {
    fn user_stack(&self, frames: &mut [u64; MAX_STACK_FRAMES]) -> i32 {
        match &self.stack {
            Ok(stack) => {
                let len = stack.len().min(MAX_STACK_FRAMES);
                frames[..len].copy_from_slice(&stack[..len]);
                len as i32
            }
            Err(errno) => *errno,
        }
    }
}

impl CurrentTask for FakeKernel {
    fn task(&self) -> usize {
        FAKE_TASK
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn comm(&self) -> [u8; TASK_COMM_LEN] {
        self.comm
    }

    fn cgroup_id(&self) -> u64 {
        self.cgroup
    }
}

/// Fixed-capacity table with the semantics of a preallocated
/// `BPF_MAP_TYPE_HASH`: creating a key past capacity fails, updating a live
/// key always works.
pub struct FakeTable {
    capacity: usize,
    entries: RefCell<BTreeMap<u32, OomEvent>>,
    hide_lookups: Cell<bool>,
}

impl FakeTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RefCell::new(BTreeMap::new()),
            hide_lookups: Cell::new(false),
        }
    }

    /// Makes `with_entry` miss even for present keys.
    pub fn hide_lookups(&self) {
        self.hide_lookups.set(true);
    }

    pub fn get(&self, pid: u32) -> Option<OomEvent> {
        self.entries.borrow().get(&pid).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn snapshot(&self) -> BTreeMap<u32, OomEvent> {
        self.entries.borrow().clone()
    }
}

impl EventTable for FakeTable {
    fn insert_if_absent(&self, pid: u32, event: &OomEvent) -> bool {
        let mut entries = self.entries.borrow_mut();
        if entries.contains_key(&pid) || entries.len() >= self.capacity {
            return false;
        }
        entries.insert(pid, *event);
        true
    }

    fn with_entry<F: FnOnce(&mut OomEvent)>(&self, pid: u32, f: F) -> bool {
        if self.hide_lookups.get() {
            return false;
        }
        match self.entries.borrow_mut().get_mut(&pid) {
            Some(event) => {
                f(event);
                true
            }
            None => false,
        }
    }

    fn upsert(&self, pid: u32, event: &OomEvent) -> bool {
        let mut entries = self.entries.borrow_mut();
        if !entries.contains_key(&pid) && entries.len() >= self.capacity {
            return false;
        }
        entries.insert(pid, *event);
        true
    }
}
