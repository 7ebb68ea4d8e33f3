//! Stamps the binary with release version, build counter, profile and commit.

use std::env;
use std::fs;
use std::path::Path;
use std::process::Command;

const BUILD_COUNTER: &str = "BUILD_NUMBER";
const VERSION_FILE: &str = "VERSION";

fn main() {
    let stamp = [
        ("SHROUD_VERSION", release_version()),
        ("SHROUD_BUILD", next_build_number(Path::new(BUILD_COUNTER)).to_string()),
        ("SHROUD_PROFILE", profile_label().to_string()),
        ("SHROUD_GIT_HASH", short_commit().unwrap_or_else(|| "unknown".into())),
    ];
    for (key, value) in stamp {
        println!("cargo:rustc-env={}={}", key, value);
    }

    println!("cargo:rerun-if-changed={}", VERSION_FILE);
    println!("cargo:rerun-if-env-changed=PROFILE");
}

/// `VERSION` when present and non-empty, the package version otherwise
fn release_version() -> String {
    fs::read_to_string(VERSION_FILE)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| env::var("CARGO_PKG_VERSION").ok())
        .unwrap_or_else(|| "0.0.0".into())
}

/// Stored counter plus one. A missing or unparsable counter restarts at 1;
/// a failed write is surfaced as a cargo warning.
fn next_build_number(counter: &Path) -> u64 {
    let previous = fs::read_to_string(counter)
        .ok()
        .and_then(|text| text.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let next = previous + 1;
    if let Err(e) = fs::write(counter, next.to_string()) {
        println!("cargo:warning=could not update {}: {}", counter.display(), e);
    }
    next
}

fn profile_label() -> &'static str {
    match env::var("PROFILE").as_deref() {
        Ok("release") => "release",
        _ => "development",
    }
}

fn short_commit() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8(output.stdout).ok()?;
    let hash = hash.trim();
    (!hash.is_empty()).then(|| hash.to_string())
}
