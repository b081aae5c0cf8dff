use crate::report::ProcessDetails;
use std::path::Path;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::debug;

const MAX_COMM_LEN: usize = 15; // TASK_COMM_LEN - 1

/// Truncates a process name the way the kernel does for `task->comm`,
/// decoded the same lossy way as a captured record's `comm`. The cut is by
/// bytes and may split a multibyte character.
pub fn truncate_process_name(name: &str) -> String {
    let bytes = name.as_bytes();
    String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_COMM_LEN)]).into_owned()
}

/// Whether `name` could be the full name behind the kernel's `comm`.
pub fn comm_matches(comm: &str, name: &str) -> bool {
    !comm.is_empty() && truncate_process_name(name) == comm
}

/// Picks the cgroup v2 path, or the memory controller's v1 path, out of
/// the contents of `/proc/<pid>/cgroup`.
pub fn parse_cgroup_path(content: &str) -> Option<String> {
    let mut memory_v1 = None;
    for line in content.lines() {
        let mut parts = line.splitn(3, ':');
        let (Some(hierarchy), Some(controllers), Some(path)) =
            (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if hierarchy == "0" && controllers.is_empty() {
            return Some(path.to_string());
        }
        if controllers.split(',').any(|c| c == "memory") {
            memory_v1 = Some(path.to_string());
        }
    }
    memory_v1
}

fn read_cgroup_path(proc_root: &Path, pid: u32) -> Option<String> {
    let content = std::fs::read_to_string(proc_root.join(pid.to_string()).join("cgroup")).ok()?;
    parse_cgroup_path(&content)
}

/// Looks up what is left of `pid`. Returns `None` when the process is gone
/// or the pid now belongs to a process whose name does not match `comm`.
pub fn lookup_process(pid: u32, comm: &str) -> Option<ProcessDetails> {
    let sys_pid = Pid::from_u32(pid);
    let refresh = ProcessRefreshKind::nothing()
        .with_exe(UpdateKind::Always)
        .with_cmd(UpdateKind::Always);
    let mut sys = System::new();
    sys.refresh_processes_specifics(ProcessesToUpdate::Some(&[sys_pid]), true, refresh);

    let process = sys.process(sys_pid)?;
    let name = process.name().to_string_lossy();
    if !comm_matches(comm, &name) {
        debug!(
            "pid {} is now '{}', not '{}'; skipping enrichment",
            pid, name, comm
        );
        return None;
    }

    Some(ProcessDetails {
        exe: process.exe().map(Path::to_path_buf),
        cmdline: process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect(),
        cgroup_path: read_cgroup_path(Path::new("/proc"), pid),
    })
}
