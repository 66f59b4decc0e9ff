//! Embeds the git revision so dev builds report `dev@<hash>` in `--version`.

use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");

    let revision = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_default();
    let tagged = git(&["describe", "--exact-match", "--tags", "HEAD"]).is_some();

    println!("cargo:rustc-env=IMMICH_SHORTCODES_REVISION={revision}");
    println!("cargo:rustc-env=IMMICH_SHORTCODES_TAGGED={tagged}");
}
