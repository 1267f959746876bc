use std::env;
use std::path::PathBuf;

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();

    let linker_script = PathBuf::from(&manifest_dir).join("src/arch_impl/armv6/linker.ld");
    println!("cargo:rerun-if-changed={}", linker_script.display());
    println!("cargo:rerun-if-changed=src/arch_impl/armv6/trap_entry.S");

    // Host builds (unit tests) link normally.
    if target_arch == "arm" {
        println!("cargo:rustc-link-arg-bins=-T{}", linker_script.display());
    }
}
