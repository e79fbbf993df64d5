//! Build script for sigstore-tuf
//!
//! Compiles `repository/root.json` into the crate as the default root of
//! trust. Without that file the client needs an explicit or cached root.

use std::path::Path;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=repository");
    println!("cargo:rustc-check-cfg=cfg(embedded_root)");

    if Path::new("repository").join("root.json").is_file() {
        println!("cargo:rustc-cfg=embedded_root");
    } else {
        println!(
            "cargo:warning=repository/root.json not found, building without a compiled-in TUF root"
        );
    }
}
