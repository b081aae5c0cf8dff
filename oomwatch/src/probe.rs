use anyhow::{anyhow, Context, Result};
use aya::maps::{HashMap, MapData};
use aya::programs::KProbe;
use aya::{Ebpf, EbpfLoader};
use nix::sys::resource::{setrlimit, Resource, RLIM_INFINITY};
use oomwatch_common::{OomEvent, ProbeOffsets, OFFSETS_GLOBAL, OOM_EVENTS_MAP};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tracing::{debug, info, warn};

const PROGRAM_NAME: &str = "kprobe_oom_kill_process";
const ATTACH_SYMBOL: &str = "oom_kill_process";

/// The loaded object with its kprobe attached. Dropping it detaches the
/// probe and releases the table once no map handle is left.
pub struct OomProbe {
    bpf: Ebpf,
}

impl OomProbe {
    /// Must be called from inside a tokio runtime: the kernel-side log
    /// forwarder is spawned onto it.
    pub fn load(offsets: &ProbeOffsets) -> Result<Self> {
        raise_memlock_limit();

        info!(
            "[OomProbe] Loading with oom_control.chosen at offset {}",
            offsets.oom_control_chosen
        );
        let mut bpf = EbpfLoader::new()
            .set_global(OFFSETS_GLOBAL, offsets, true)
            .load(aya::include_bytes_aligned!(concat!(
                env!("OUT_DIR"),
                "/oomwatch"
            )))
            .context("Failed to load the eBPF object")?;

        init_ebpf_logger(&mut bpf);

        let program: &mut KProbe = bpf
            .program_mut(PROGRAM_NAME)
            .ok_or_else(|| anyhow!("Program '{}' not found", PROGRAM_NAME))?
            .try_into()?;
        program.load()?;
        program
            .attach(ATTACH_SYMBOL, 0)
            .with_context(|| format!("Failed to attach kprobe to {}", ATTACH_SYMBOL))?;
        info!("[OomProbe] kprobe attached to {}.", ATTACH_SYMBOL);

        Ok(Self { bpf })
    }

    /// Hands out the shared table. Succeeds once per probe.
    pub fn take_table(&mut self) -> Result<HashMap<MapData, u32, OomEvent>> {
        let map = self
            .bpf
            .take_map(OOM_EVENTS_MAP)
            .ok_or_else(|| anyhow!("Failed to take ownership of '{}' map", OOM_EVENTS_MAP))?;
        Ok(HashMap::try_from(map)?)
    }
}

fn raise_memlock_limit() {
    // kernels before 5.11 charge maps against RLIMIT_MEMLOCK
    if let Err(e) = setrlimit(Resource::RLIMIT_MEMLOCK, RLIM_INFINITY, RLIM_INFINITY) {
        debug!("[OomProbe] Removing the locked memory limit failed: {}", e);
    }
}

fn init_ebpf_logger(bpf: &mut Ebpf) {
    let logger = match aya_log::EbpfLogger::init(bpf) {
        Ok(logger) => logger,
        Err(e) => {
            // the object only logs at debug level; carry on without it
            warn!("[OomProbe] Failed to initialize eBPF logger: {}", e);
            return;
        }
    };
    let mut logger = match AsyncFd::with_interest(logger, Interest::READABLE) {
        Ok(logger) => logger,
        Err(e) => {
            warn!("[OomProbe] Failed to poll eBPF logger: {}", e);
            return;
        }
    };
    tokio::spawn(async move {
        loop {
            let mut guard = match logger.readable_mut().await {
                Ok(guard) => guard,
                Err(e) => {
                    warn!("[OomProbe] eBPF logger stopped: {}", e);
                    break;
                }
            };
            guard.get_inner_mut().flush();
            guard.clear_ready();
        }
    });
}
