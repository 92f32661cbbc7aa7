// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-env-changed=CAMERA_PIPELINE_VERSION");

    // Packagers set the version explicitly
    let version = match std::env::var("CAMERA_PIPELINE_VERSION") {
        Ok(version) => version,
        Err(_) => git_version().unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
    };

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// "0.1.0-abcdef1" at a tag, "0.1.0-dirty-abcdef1" past one
fn git_version() -> Option<String> {
    let described = git(&["describe", "--tags", "--always", "--match", "v*"])?;
    let described = described.strip_prefix('v').unwrap_or(&described);

    let parts: Vec<&str> = described.rsplitn(3, '-').collect();
    if let [hash, _commits, base] = parts.as_slice() {
        let hash = hash.strip_prefix('g').unwrap_or(hash);
        return Some(format!("{}-dirty-{}", base, hash));
    }
    let commit = git(&["rev-parse", "--short", "HEAD"])?;
    if described == commit {
        // No tag at all
        Some(format!("{}-{}", env!("CARGO_PKG_VERSION"), commit))
    } else {
        Some(format!("{}-{}", described, commit))
    }
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}
