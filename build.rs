// SPDX-License-Identifier: MPL-2.0

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");

    // Packagers can pin the version string explicitly
    let version = std::env::var("WEBCAM_FILTERS_VERSION")
        .ok()
        .or_else(git_describe)
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// `git describe` output without the leading `v`, e.g. "0.2.0-3-gabcdef1"
fn git_describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty", "--match", "v*"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let described = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let described = described.strip_prefix('v').unwrap_or(&described);
    Some(described.to_string())
}
