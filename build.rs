//! Embeds commit hash and build time for `turnwise --version`.
//!
//! Falls back to "unknown" markers when git or date are unavailable.

use std::env;
use std::fs;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    watch_head_ref();
    println!("cargo:rerun-if-env-changed=TURNWISE_BUILD_GIT_HASH");
    println!("cargo:rerun-if-env-changed=TURNWISE_BUILD_TIMESTAMP");

    let git_hash = env::var("TURNWISE_BUILD_GIT_HASH").unwrap_or_else(|_| short_hash());
    let timestamp = env::var("TURNWISE_BUILD_TIMESTAMP").unwrap_or_else(|_| timestamp_utc());

    println!("cargo:rustc-env=TURNWISE_BUILD_GIT_HASH={git_hash}");
    println!("cargo:rustc-env=TURNWISE_BUILD_TIMESTAMP={timestamp}");
}

fn watch_head_ref() {
    let Ok(head) = fs::read_to_string(".git/HEAD") else {
        return;
    };
    if let Some(reference) = head.trim().strip_prefix("ref: ") {
        println!("cargo:rerun-if-changed=.git/{reference}");
    }
}

fn short_hash() -> String {
    capture("git", &["rev-parse", "--short=12", "HEAD"]).unwrap_or_else(|| "unknown".to_string())
}

fn timestamp_utc() -> String {
    if let Some(stamp) = capture("date", &["-u", "+%Y-%m-%dT%H:%M:%SZ"]) {
        return stamp;
    }
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("unix:{secs}")
}

fn capture(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
