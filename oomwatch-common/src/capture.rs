//! Capture path run from the `oom_kill_process` kprobe.
//!
//! Everything here is generic over small capability traits so the same code
//! runs inside the probe (bound to BPF helpers) and in host tests. The code
//! must stay verifier friendly: no allocation, no unbounded loops, no panics.

use crate::{OomEvent, ProbeOffsets, MAX_STACK_FRAMES, OFFSET_UNKNOWN, TASK_COMM_LEN};

pub const ENOENT: i64 = 2;
pub const EFAULT: i64 = 14;
pub const EINVAL: i64 = 22;
pub const ELOOP: i64 = 40;

/// Reads kernel memory without faulting. Failures come back as negative
/// errno values.
pub trait FieldReader {
    fn read_u64(&self, addr: usize) -> Result<u64, i64>;

    /// Copies a NUL terminated string into `buf`, returning its length
    /// without the terminator.
    fn read_str(&self, addr: usize, buf: &mut [u8]) -> Result<usize, i64>;

    /// Reads the pointer stored `offset` bytes into the structure at `base`.
    fn read_ptr(&self, base: usize, offset: u32) -> Result<usize, i64> {
        if base == 0 {
            return Err(-EFAULT);
        }
        if offset == OFFSET_UNKNOWN {
            return Err(-EINVAL);
        }
        let addr = base.checked_add(offset as usize).ok_or(-EFAULT)?;
        self.read_u64(addr).map(|value| value as usize)
    }
}

/// Captures the user-space call stack of the current task.
pub trait StackSampler {
    /// Fills `frames` from the most recent frame and returns how many were
    /// written, or a negative errno.
    fn user_stack(&self, frames: &mut [u64; MAX_STACK_FRAMES]) -> i32;
}

/// Accessors for the task running the probe.
pub trait CurrentTask {
    /// Address of the current `task_struct`.
    fn task(&self) -> usize;
    /// Thread group id.
    fn pid(&self) -> u32;
    fn comm(&self) -> [u8; TASK_COMM_LEN];
    fn cgroup_id(&self) -> u64;
}

/// Probe side of the shared pid-keyed table. Deletion belongs to the
/// consumer and is not part of this trait.
pub trait EventTable {
    /// Creates the entry only if `pid` is not present yet.
    fn insert_if_absent(&self, pid: u32, event: &OomEvent) -> bool;

    /// Runs `f` against the live value for `pid`. Returns false when the key
    /// is absent.
    fn with_entry<F: FnOnce(&mut OomEvent)>(&self, pid: u32, f: F) -> bool;

    /// Unconditional create-or-replace. Returns false if the table refused it.
    fn upsert(&self, pid: u32, event: &OomEvent) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildOutcome {
    /// All fields populated with a usable stack.
    Recorded { frames: u32 },
    /// All fields populated, stack capture failed with `errno`.
    Degraded { errno: i32 },
    /// Lookup after insert failed; the placeholder was written back.
    Reset,
    /// The key could not be created at all, the table is full.
    Dropped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookOutcome {
    /// The killer bailed out before choosing a victim.
    NoVictim,
    Captured(BuildOutcome),
}

/// Builds and commits one [`OomEvent`] for the current task.
///
/// The entry is created with a zeroed placeholder and then populated in
/// place. A failing stack capture leaves the other fields valid and the
/// negative errno in `user_stack_size`.
pub fn record_event<E, T>(env: &E, table: &T) -> BuildOutcome
where
    E: CurrentTask + StackSampler,
    T: EventTable,
{
    let pid = env.pid();
    // false when the pid is already live or the table is full
    let _ = table.insert_if_absent(pid, &OomEvent::EMPTY);

    let mut stack_size = 0;
    let found = table.with_entry(pid, |event| {
        event.pid = pid;
        event.comm = env.comm();
        event.cgroup_id = env.cgroup_id() as u32;
        event.user_stack_size = env.user_stack(&mut event.user_stack);
        stack_size = event.user_stack_size;
    });

    if !found {
        return if table.upsert(pid, &OomEvent::EMPTY) {
            BuildOutcome::Reset
        } else {
            BuildOutcome::Dropped
        };
    }

    if stack_size < 0 {
        BuildOutcome::Degraded { errno: stack_size }
    } else {
        BuildOutcome::Recorded {
            frames: stack_size as u32,
        }
    }
}

/// Entry point for the `oom_kill_process` kprobe. `oom_control` is the
/// function's first argument.
pub fn on_oom_kill<E, T>(
    env: &E,
    table: &T,
    oom_control: usize,
    offsets: &ProbeOffsets,
) -> HookOutcome
where
    E: CurrentTask + StackSampler + FieldReader,
    T: EventTable,
{
    match env.read_ptr(oom_control, offsets.oom_control_chosen) {
        Ok(victim) if victim != 0 => HookOutcome::Captured(record_event(env, table)),
        _ => HookOutcome::NoVictim,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeKernel, FakeTable};
    use crate::OOM_EVENTS_MAX_ENTRIES;

    const OOM_CONTROL: usize = 0xffff_8880_0100_0000;
    const VICTIM: usize = 0xffff_8880_0200_0000;

    fn kernel_with_victim(pid: u32, comm: &str) -> FakeKernel {
        let mut kernel = FakeKernel::new(pid, comm);
        kernel.poke(OOM_CONTROL + 40, VICTIM as u64);
        kernel
    }

    #[test]
    fn capture_records_name_padded_to_sixteen_bytes() {
        let kernel = kernel_with_victim(77, "stress-ng");
        let table = FakeTable::new(OOM_EVENTS_MAX_ENTRIES as usize);

        on_oom_kill(&kernel, &table, OOM_CONTROL, &ProbeOffsets::DEFAULT);

        let event = table.get(77).expect("entry for pid 77");
        assert_eq!(&event.comm, b"stress-ng\0\0\0\0\0\0\0");
        assert_eq!(event.pid, 77);
    }

    #[test]
    fn long_names_are_truncated_by_the_accessor() {
        let kernel = kernel_with_victim(78, "a-very-long-process-name");
        let table = FakeTable::new(16);

        on_oom_kill(&kernel, &table, OOM_CONTROL, &ProbeOffsets::DEFAULT);

        let event = table.get(78).unwrap();
        assert_eq!(&event.comm, b"a-very-long-pro\0");
    }

    #[test]
    fn twelve_frame_capture_for_pid_4242() {
        let mut kernel = kernel_with_victim(4242, "java");
        let frames: std::vec::Vec<u64> = (0..12).map(|i| 0x7f00_0000_1000 + i * 0x10).collect();
        kernel.stack = Ok(frames.clone());
        kernel.cgroup = 0x1_0000_2345;
        let table = FakeTable::new(OOM_EVENTS_MAX_ENTRIES as usize);

        let outcome = on_oom_kill(&kernel, &table, OOM_CONTROL, &ProbeOffsets::DEFAULT);

        assert_eq!(
            outcome,
            HookOutcome::Captured(BuildOutcome::Recorded { frames: 12 })
        );
        let event = table.get(4242).unwrap();
        assert_eq!(event.user_stack_size, 12);
        assert_eq!(&event.user_stack[..12], &frames[..]);
        assert_eq!(event.cgroup_id, 0x2345);
        assert_eq!(event.frames().unwrap().len(), 12);
    }

    #[test]
    fn recapture_before_drain_overwrites_in_place() {
        let mut kernel = kernel_with_victim(4242, "java");
        kernel.stack = Ok(std::vec![0xaaaa; 30]);
        kernel.cgroup = 10;
        let table = FakeTable::new(OOM_EVENTS_MAX_ENTRIES as usize);
        on_oom_kill(&kernel, &table, OOM_CONTROL, &ProbeOffsets::DEFAULT);

        kernel.set_comm("java-restarted");
        kernel.stack = Ok(std::vec![0xbbbb, 0xcccc]);
        kernel.cgroup = 11;
        on_oom_kill(&kernel, &table, OOM_CONTROL, &ProbeOffsets::DEFAULT);

        assert_eq!(table.len(), 1);
        let event = table.get(4242).unwrap();
        assert_eq!(event.pid, 4242);
        assert_eq!(event.comm_bytes(), b"java-restarted");
        assert_eq!(event.cgroup_id, 11);
        assert_eq!(event.frames(), Some(&[0xbbbb_u64, 0xcccc][..]));
        // stale tail from the first capture is still there but past the count
        assert_eq!(event.user_stack[2], 0xaaaa);
    }

    #[test]
    fn stack_failure_commits_other_fields() {
        let mut kernel = kernel_with_victim(900, "postgres");
        kernel.stack = Err(-14);
        kernel.cgroup = 5;
        let table = FakeTable::new(16);

        let outcome = on_oom_kill(&kernel, &table, OOM_CONTROL, &ProbeOffsets::DEFAULT);

        assert_eq!(
            outcome,
            HookOutcome::Captured(BuildOutcome::Degraded { errno: -14 })
        );
        let event = table.get(900).unwrap();
        assert_eq!(event.pid, 900);
        assert_eq!(event.comm_bytes(), b"postgres");
        assert_eq!(event.cgroup_id, 5);
        assert!(event.user_stack_size < 0);
        assert_eq!(event.frames(), None);
    }

    #[test]
    fn stack_count_never_exceeds_buffer() {
        let mut kernel = kernel_with_victim(1, "init");
        kernel.stack = Ok(std::vec![0x1; 200]);
        let table = FakeTable::new(16);

        on_oom_kill(&kernel, &table, OOM_CONTROL, &ProbeOffsets::DEFAULT);

        let event = table.get(1).unwrap();
        assert!((-1..=MAX_STACK_FRAMES as i32).contains(&event.user_stack_size));
        assert_eq!(event.user_stack_size, MAX_STACK_FRAMES as i32);
    }

    #[test]
    fn null_victim_leaves_table_untouched() {
        let kernel = FakeKernel::new(4242, "java");
        let table = FakeTable::new(16);
        let mut existing = OomEvent::EMPTY;
        existing.pid = 17;
        table.upsert(17, &existing);
        let before = table.snapshot();

        // chosen slot reads back as zero
        let outcome = on_oom_kill(&kernel, &table, OOM_CONTROL, &ProbeOffsets::DEFAULT);

        assert_eq!(outcome, HookOutcome::NoVictim);
        assert_eq!(table.snapshot(), before);
        assert!(table.get(4242).is_none());
    }

    #[test]
    fn unreadable_oom_control_is_a_no_op() {
        let kernel = FakeKernel::new(4242, "java");
        let table = FakeTable::new(16);

        assert_eq!(
            on_oom_kill(&kernel, &table, 0, &ProbeOffsets::DEFAULT),
            HookOutcome::NoVictim
        );
        let mut offsets = ProbeOffsets::DEFAULT;
        offsets.oom_control_chosen = OFFSET_UNKNOWN;
        assert_eq!(
            on_oom_kill(&kernel, &table, OOM_CONTROL, &offsets),
            HookOutcome::NoVictim
        );
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn full_table_drops_new_pid_silently() {
        let capacity = OOM_EVENTS_MAX_ENTRIES as usize;
        let table = FakeTable::new(capacity);
        for pid in 0..capacity as u32 {
            let mut event = OomEvent::EMPTY;
            event.pid = pid;
            table.upsert(pid, &event);
        }
        let before = table.snapshot();
        let kernel = kernel_with_victim(capacity as u32 + 1, "hog");

        let outcome = on_oom_kill(&kernel, &table, OOM_CONTROL, &ProbeOffsets::DEFAULT);

        assert_eq!(outcome, HookOutcome::Captured(BuildOutcome::Dropped));
        assert_eq!(table.len(), capacity);
        assert_eq!(table.snapshot(), before);
    }

    #[test]
    fn full_table_still_updates_live_pid() {
        let table = FakeTable::new(2);
        table.upsert(1, &OomEvent::EMPTY);
        table.upsert(2, &OomEvent::EMPTY);
        let kernel = kernel_with_victim(2, "worker");

        let outcome = on_oom_kill(&kernel, &table, OOM_CONTROL, &ProbeOffsets::DEFAULT);

        assert!(matches!(
            outcome,
            HookOutcome::Captured(BuildOutcome::Recorded { .. })
        ));
        assert_eq!(table.get(2).unwrap().comm_bytes(), b"worker");
    }

    #[test]
    fn lost_lookup_falls_back_to_placeholder() {
        let kernel = kernel_with_victim(31, "redis");
        let table = FakeTable::new(16);
        table.hide_lookups();

        let outcome = record_event(&kernel, &table);

        assert_eq!(outcome, BuildOutcome::Reset);
        assert_eq!(table.get(31), Some(OomEvent::EMPTY));
    }
}
