use std::env;
use std::time::{SystemTime, UNIX_EPOCH};

fn emit_build_version() {
    let n = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    println!("cargo:rustc-env=ASSAY_AUDIT_BUILD_N={n}");
    println!("cargo:rustc-env=ASSAY_AUDIT_DISPLAY_VERSION={version}+{n}");
}

fn main() {
    emit_build_version();
    // The standards table is compiled in.
    println!("cargo:rerun-if-changed=assets/standards.json");
    println!("cargo:rerun-if-changed=build.rs");
}
