use std::{env, path::PathBuf};

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    println!("cargo:rerun-if-changed=link.x");
    println!("cargo:rerun-if-changed=src/boot.s");

    // Host builds only compile the stub `main`.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("none") {
        println!("cargo:rustc-link-search={}", manifest_dir.display());
        println!("cargo:rustc-link-arg-bins=-Tlink.x");
    }
}
