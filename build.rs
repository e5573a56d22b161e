//! Stamps the binary with a build identifier for the startup log
//!
//! `TRAILGUIDE_BUILD_ID` wins when set (release tarballs have no .git);
//! otherwise `git describe` output, or "unknown".

use std::env;
use std::process::Command;

fn git_describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=10"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let id = String::from_utf8(output.stdout).ok()?;
    let id = id.trim();
    (!id.is_empty()).then(|| id.to_string())
}

fn main() {
    println!("cargo:rerun-if-env-changed=TRAILGUIDE_BUILD_ID");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let build_id = env::var("TRAILGUIDE_BUILD_ID")
        .ok()
        .filter(|id| !id.trim().is_empty())
        .or_else(git_describe)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=TRAILGUIDE_BUILD_ID={build_id}");
}
