#![cfg_attr(feature = "build-ebpf", no_std)]
#![cfg_attr(feature = "build-ebpf", no_main)]

// Keep the BPF-only code in one cfg'd module instead of sprinkling #[cfg].
#[cfg(feature = "build-ebpf")]
mod ebpf {
    use core::ffi::c_void;

    use aya_ebpf::{
        bindings::{BPF_ANY, BPF_F_USER_STACK, BPF_NOEXIST},
        helpers::{
            bpf_get_current_cgroup_id, bpf_get_current_task, bpf_get_stack,
            bpf_probe_read_kernel, bpf_probe_read_kernel_str_bytes,
        },
        macros::{kprobe, map},
        maps::HashMap,
        programs::ProbeContext,
        EbpfContext,
    };
    use aya_log_ebpf::debug;
    use oomwatch_common::{
        on_oom_kill, BuildOutcome, CurrentTask, EventTable, FieldReader, HookOutcome, OomEvent,
        ProbeOffsets, StackSampler, MAX_STACK_FRAMES, OOM_EVENTS_MAX_ENTRIES, TASK_COMM_LEN,
    };

    const STACK_BYTES: u32 = (MAX_STACK_FRAMES * core::mem::size_of::<u64>()) as u32;

    // Patched by the loader before the object is loaded.
    #[no_mangle]
    static OFFSETS: ProbeOffsets = ProbeOffsets::DEFAULT;

    #[map]
    static OOM_EVENTS: HashMap<u32, OomEvent> =
        HashMap::with_max_entries(OOM_EVENTS_MAX_ENTRIES, 0);

    struct KernelTable(&'static HashMap<u32, OomEvent>);

    impl EventTable for KernelTable {
        fn insert_if_absent(&self, pid: u32, event: &OomEvent) -> bool {
            self.0.insert(&pid, event, BPF_NOEXIST as u64).is_ok()
        }

        fn with_entry<F: FnOnce(&mut OomEvent)>(&self, pid: u32, f: F) -> bool {
            match self.0.get_ptr_mut(&pid) {
                Some(ptr) => {
                    // the map value stays valid for the rest of the program
                    f(unsafe { &mut *ptr });
                    true
                }
                None => false,
            }
        }

        fn upsert(&self, pid: u32, event: &OomEvent) -> bool {
            self.0.insert(&pid, event, BPF_ANY as u64).is_ok()
        }
    }

    struct ProbeEnv<'a> {
        ctx: &'a ProbeContext,
    }

    impl FieldReader for ProbeEnv<'_> {
        fn read_u64(&self, addr: usize) -> Result<u64, i64> {
            unsafe { bpf_probe_read_kernel(addr as *const u64) }.map_err(i64::from)
        }

        fn read_str(&self, addr: usize, buf: &mut [u8]) -> Result<usize, i64> {
            unsafe { bpf_probe_read_kernel_str_bytes(addr as *const u8, buf) }
                .map(|s| s.len())
                .map_err(i64::from)
        }
    }

    impl StackSampler for ProbeEnv<'_> {
        fn user_stack(&self, frames: &mut [u64; MAX_STACK_FRAMES]) -> i32 {
            let ret = unsafe {
                bpf_get_stack(
                    self.ctx.as_ptr(),
                    frames.as_mut_ptr() as *mut c_void,
                    STACK_BYTES,
                    BPF_F_USER_STACK as u64,
                )
            };
            if ret < 0 {
                return ret as i32;
            }
            // bpf_get_stack reports bytes copied
            (ret as usize / core::mem::size_of::<u64>()).min(MAX_STACK_FRAMES) as i32
        }
    }

    impl CurrentTask for ProbeEnv<'_> {
        fn task(&self) -> usize {
            unsafe { bpf_get_current_task() as usize }
        }

        fn pid(&self) -> u32 {
            self.ctx.tgid()
        }

        fn comm(&self) -> [u8; TASK_COMM_LEN] {
            self.ctx.command().unwrap_or_default()
        }

        fn cgroup_id(&self) -> u64 {
            unsafe { bpf_get_current_cgroup_id() }
        }
    }

    #[kprobe]
    pub fn kprobe_oom_kill_process(ctx: ProbeContext) -> u32 {
        match try_kprobe_oom_kill_process(&ctx) {
            Ok(ret) => ret,
            Err(ret) => ret,
        }
    }

    fn try_kprobe_oom_kill_process(ctx: &ProbeContext) -> Result<u32, u32> {
        // struct oom_control *oc
        let oom_control: *const c_void = ctx.arg(0).ok_or(0u32)?;
        let offsets = unsafe { core::ptr::read_volatile(&OFFSETS) };
        let env = ProbeEnv { ctx };

        match on_oom_kill(&env, &KernelTable(&OOM_EVENTS), oom_control as usize, &offsets) {
            HookOutcome::NoVictim => {
                debug!(ctx, "oom_kill_process: no victim chosen");
            }
            HookOutcome::Captured(BuildOutcome::Recorded { frames }) => {
                debug!(ctx, "oom capture pid={} frames={}", env.pid(), frames);
            }
            HookOutcome::Captured(BuildOutcome::Degraded { errno }) => {
                debug!(ctx, "oom capture pid={} stack failed: {}", env.pid(), errno);
            }
            HookOutcome::Captured(BuildOutcome::Reset) => {
                debug!(ctx, "oom capture pid={} lookup failed, entry reset", env.pid());
            }
            HookOutcome::Captured(BuildOutcome::Dropped) => {
                debug!(ctx, "oom capture pid={} dropped, table full", env.pid());
            }
        }

        Ok(0)
    }

    #[link_section = "license"]
    #[no_mangle]
    static LICENSE: [u8; 4] = *b"GPL\0";

    // no_std needs a panic handler; only present when the BPF feature is on
    #[cfg(not(test))]
    #[panic_handler]
    fn panic(_info: &core::panic::PanicInfo) -> ! {
        loop {}
    }
}

// Host builds without the BPF feature get an empty std main.
#[cfg(not(feature = "build-ebpf"))]
fn main() {
    eprintln!("oomwatch-ebpf built without 'build-ebpf' feature; skipping eBPF program");
}
