// src/main.rs

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;

const CHUNK_BYTES: usize = 16 * 1024 * 1024;
const PAGE_BYTES: usize = 4096;

fn resolve_pid_file() -> PathBuf {
    env::var("OOM_HOG_PID_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("oom_hog.pid"))
}

/// Optional cap in MiB; without one the hog grows until it is killed.
fn resolve_limit_mib() -> Option<usize> {
    env::args().nth(1).and_then(|arg| arg.parse().ok())
}

fn write_pid_file(path: &PathBuf, pid: u32) {
    if let Some(parent_dir) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent_dir) {
            eprintln!("error: cannot create {}: {}", parent_dir.display(), e);
            process::exit(1);
        }
    }
    if let Err(e) = fs::write(path, pid.to_string()) {
        eprintln!("error: cannot write pid file {}: {}", path.display(), e);
        process::exit(1);
    }
}

fn main() {
    let my_pid = process::id();
    let pid_file_path = resolve_pid_file();
    write_pid_file(&pid_file_path, my_pid);
    println!("oom_hog started, pid {} (pid file {})", my_pid, pid_file_path.display());

    let limit_mib = resolve_limit_mib();
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    loop {
        let allocated_mib = chunks.len() * CHUNK_BYTES / (1024 * 1024);
        if limit_mib.is_some_and(|limit| allocated_mib >= limit) {
            println!("\nreached {} MiB without being killed; idling", allocated_mib);
            loop {
                thread::sleep(Duration::from_secs(60));
            }
        }

        // touch every page so the memory is actually charged
        let mut chunk = vec![0u8; CHUNK_BYTES];
        for offset in (0..CHUNK_BYTES).step_by(PAGE_BYTES) {
            chunk[offset] = 1;
        }
        chunks.push(chunk);

        print!("\r[pid {}] holding {} MiB", my_pid, allocated_mib + 16);
        let _ = io::stdout().flush();
        thread::sleep(Duration::from_millis(20));
    }
}
