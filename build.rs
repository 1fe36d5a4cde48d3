use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

/// Exposes `GAPI_VERSION` to the crate: the nearest git tag, or the package
/// version with a build stamp when the tree is dirty or not a checkout.
fn main() {
    for path in [".git/HEAD", ".git/index"] {
        println!("cargo:rerun-if-changed={}", path);
    }

    let version = match describe() {
        Some(tag) if !tag.ends_with("-dirty") => tag,
        Some(tag) => format!("{}-{}", tag, build_stamp()),
        None => format!("{}-unknown-{}", env!("CARGO_PKG_VERSION"), build_stamp()),
    };
    println!("cargo:rustc-env=GAPI_VERSION={}", version);
}

/// `git describe` without the leading `v` of release tags.
fn describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|o| o.status.success())?;
    let described = String::from_utf8(output.stdout).ok()?;
    let tag = described.trim();
    let tag = tag.strip_prefix('v').unwrap_or(tag);
    (!tag.is_empty()).then(|| tag.to_string())
}

fn build_stamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
