//! Stamps the git revision into the binary (`RIFF_GIT_REV`), reported by
//! `/health` and the startup log.

use std::process::Command;

fn main() {
    let rev = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=RIFF_GIT_REV={}", rev);
    println!("cargo:rerun-if-changed=../.git/HEAD");
}
