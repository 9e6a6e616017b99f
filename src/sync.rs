//! Wrapper around the external rsync invocation.
//!
//! The exclusion set is fixed: pseudo filesystems, the swap file, caches,
//! container runtime state, and foreign mount points. `-x` additionally
//! keeps the transfer on the root filesystem, so nested mounts never leak
//! into the image.

use anyhow::{bail, Result};
use std::path::Path;

use crate::loopdev;
use crate::process::Cmd;

/// Paths never copied into the backup.
pub const EXCLUDES: &[&str] = &[
    "/tmp/*",
    "/proc/*",
    "/run/*",
    "/sys/*",
    "/.Trash*",
    "lost+found",
    "/var/swap",
    "/home/*/.cache/*",
    "/root/.cache/*",
    "/var/cache/apt/archives/*",
    "/var/lib/docker/*",
    "/var/lib/containerd/*",
    "/mnt/*",
    "/media/*",
];

/// rsync exit code for files that vanished mid-transfer. Expected when
/// copying a live system; not a failure.
const VANISHED: i32 = 24;

/// Synchronize the running root filesystem into the mounted image.
///
/// Skips (successfully) when the destination is not a mount point, so a
/// failed earlier mount can never make rsync write into the bare directory.
pub fn run(mount_dir: &Path, log_path: Option<&Path>) -> Result<()> {
    if !loopdev::is_mount_point(mount_dir) {
        println!(
            "  [SKIP] {} is not a mount point; nothing to sync",
            mount_dir.display()
        );
        return Ok(());
    }

    let mut cmd = Cmd::new("rsync").args(["-aX", "-x", "--delete", "--stats"]);
    for pattern in EXCLUDES {
        cmd = cmd.arg(format!("--exclude={pattern}"));
    }
    if let Some(log) = log_path {
        cmd = cmd.arg(format!("--log-file={}", log.display()));
    }
    cmd = cmd.arg("/").arg_path(mount_dir);

    let status = cmd.allow_fail().run_streaming()?;
    match status.code() {
        Some(0) | Some(VANISHED) => Ok(()),
        Some(code) => bail!("rsync transfer failed (exit code {code})"),
        None => bail!("rsync terminated by signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusions_cover_pseudo_filesystems() {
        for required in ["/proc/*", "/sys/*", "/run/*", "/tmp/*"] {
            assert!(EXCLUDES.contains(&required), "missing {required}");
        }
    }

    #[test]
    fn test_exclusions_cover_swap_and_caches() {
        assert!(EXCLUDES.contains(&"/var/swap"));
        assert!(EXCLUDES.contains(&"/var/cache/apt/archives/*"));
        assert!(EXCLUDES.contains(&"/home/*/.cache/*"));
    }

    #[test]
    fn test_skips_when_not_a_mount_point() {
        let dir = tempfile::tempdir().unwrap();
        // A plain temp directory is not a mount point, so this returns Ok
        // without invoking rsync.
        run(dir.path(), None).unwrap();
    }
}
