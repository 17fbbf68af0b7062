use std::process::Command;

fn main() {
    // NATSDASH_VERSION: release tooling can set this at build time.
    // Falls back to CARGO_PKG_VERSION (from Cargo.toml) for local builds.
    let version = std::env::var("NATSDASH_VERSION")
        .unwrap_or_else(|_| std::env::var("CARGO_PKG_VERSION").unwrap_or_default());
    println!("cargo:rustc-env=NATSDASH_VERSION={version}");

    // NATSDASH_COMMIT: falls back to `git rev-parse --short HEAD` for local builds.
    let commit = std::env::var("NATSDASH_COMMIT").unwrap_or_else(|_| {
        let output = Command::new("git")
            .args(["rev-parse", "--short", "HEAD"])
            .output();
        match output {
            Ok(o) if o.status.success() => {
                String::from_utf8_lossy(&o.stdout).trim().to_string()
            }
            _ => "unknown".to_string(),
        }
    });
    println!("cargo:rustc-env=NATSDASH_COMMIT={commit}");

    println!("cargo:rerun-if-env-changed=NATSDASH_VERSION");
    println!("cargo:rerun-if-env-changed=NATSDASH_COMMIT");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
