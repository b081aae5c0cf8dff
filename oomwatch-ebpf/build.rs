use which::which;

// bpf-linker is an undeclared dependency of this crate; rebuild when the
// binary found on PATH changes.
fn main() {
    if let Ok(bpf_linker) = which("bpf-linker") {
        println!("cargo:rerun-if-changed={}", bpf_linker.display());
    }
}
