//! Preflight checks: privilege and external tool availability.
//!
//! Every command validates its dependencies eagerly, before any mutating
//! step runs. `sdmirror preflight` prints the full report.

use anyhow::Result;

use crate::errors::BackupError;
use crate::process;

/// (tool, package hint, purpose).
pub type Tool = (&'static str, &'static str, &'static str);

/// Tools every device-touching command relies on.
pub const ATTACH_TOOLS: &[Tool] = &[
    ("losetup", "util-linux", "Loop device attachment"),
    ("partprobe", "parted", "Partition re-scan"),
    ("partx", "util-linux", "Partition node removal"),
    ("findmnt", "util-linux", "Mount table queries"),
    ("sync", "coreutils", "Write barriers"),
];

/// Tools for image allocation and disk initialization.
pub const CREATE_TOOLS: &[Tool] = &[
    ("dd", "coreutils", "Sparse allocation and bootloader seeding"),
    ("blockdev", "util-linux", "Source device geometry"),
    ("parted", "parted", "Partition table creation"),
    ("mkfs.ext4", "e2fsprogs", "Filesystem creation"),
    ("curl", "curl", "Bootloader payload fetch"),
];

/// Tools for the mount/sync cycle.
pub const MOUNT_TOOLS: &[Tool] = &[
    ("mount", "util-linux", "Partition mounting"),
    ("umount", "util-linux", "Partition unmounting"),
];

pub const SYNC_TOOLS: &[Tool] = &[("rsync", "rsync", "File synchronization")];

/// Tools for identity cloning.
pub const IDENTITY_TOOLS: &[Tool] = &[
    ("blkid", "util-linux", "UUID lookup"),
    ("tune2fs", "e2fsprogs", "Filesystem UUID rewrite"),
    ("e2fsck", "e2fsprogs", "Filesystem consistency check"),
    ("fdisk", "util-linux", "Partition-table identifier rewrite"),
];

/// Tools for growing an image.
pub const RESIZE_TOOLS: &[Tool] = &[
    ("dd", "coreutils", "Sparse growth"),
    ("parted", "parted", "Partition growth"),
    ("e2fsck", "e2fsprogs", "Filesystem consistency check"),
    ("resize2fs", "e2fsprogs", "Filesystem growth"),
];

/// Tools for the standalone integrity check.
pub const CHECK_TOOLS: &[Tool] = &[("e2fsck", "e2fsprogs", "Filesystem consistency check")];

/// Tools needed only when compression is requested.
pub const COMPRESS_TOOLS: &[Tool] = &[
    ("pv", "pv", "Progress-metered streaming"),
    ("gzip", "gzip", "Compression"),
];

/// Tools for the usage report.
pub const DF_TOOLS: &[Tool] = &[("df", "coreutils", "Filesystem usage report")];

/// Optional extras, reported by `preflight` but never fatal.
const OPTIONAL_TOOLS: &[Tool] = &[("mkfs.vfat", "dosfstools", "FAT boot partitions")];

/// Fail fast unless running as root.
pub fn require_root() -> Result<(), BackupError> {
    // Device nodes, loop control, and mounts all need it; there is no
    // point starting without.
    if unsafe { libc::geteuid() } != 0 {
        return Err(BackupError::Privilege);
    }
    Ok(())
}

/// Fail with `DependencyMissing` on the first absent tool.
pub fn require(groups: &[&[Tool]]) -> Result<(), BackupError> {
    for (tool, _package, purpose) in groups.iter().flat_map(|g| g.iter()) {
        if !process::exists(tool) {
            return Err(BackupError::DependencyMissing {
                tool: tool.to_string(),
                purpose: purpose.to_string(),
            });
        }
    }
    Ok(())
}

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
}

impl CheckResult {
    fn pass_with(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: Some(details.to_string()),
        }
    }

    fn fail(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            details: Some(details.to_string()),
        }
    }

    fn warn(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warn,
            details: Some(details.to_string()),
        }
    }
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Returns true if all checks passed (no failures).
    pub fn all_passed(&self) -> bool {
        !self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    pub fn fail_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .count()
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            let (icon, status) = match check.status {
                CheckStatus::Pass => ("✓", "PASS"),
                CheckStatus::Fail => ("✗", "FAIL"),
                CheckStatus::Warn => ("⚠", "WARN"),
            };
            print!("  {} [{}] {}", icon, status, check.name);
            match &check.details {
                Some(details) => println!(": {}", details),
                None => println!(),
            }
        }

        let total = self.checks.len();
        let failed = self.fail_count();
        println!("\nSummary: {}/{} passed", total - failed, total);
        if failed > 0 {
            println!("         {} FAILED", failed);
        }
    }
}

/// Check everything: privilege, required tools, optional tools.
pub fn run_preflight() -> PreflightReport {
    let mut checks = Vec::new();

    match require_root() {
        Ok(()) => checks.push(CheckResult::pass_with("root privilege", "running as root")),
        Err(_) => checks.push(CheckResult::fail(
            "root privilege",
            "not running as root; every device command will refuse to start",
        )),
    }

    let required: &[&[Tool]] = &[
        ATTACH_TOOLS,
        CREATE_TOOLS,
        MOUNT_TOOLS,
        SYNC_TOOLS,
        IDENTITY_TOOLS,
        RESIZE_TOOLS,
        COMPRESS_TOOLS,
        DF_TOOLS,
    ];
    let mut seen = std::collections::HashSet::new();
    for (tool, package, purpose) in required.iter().flat_map(|g| g.iter()) {
        if !seen.insert(*tool) {
            continue;
        }
        match process::which(tool) {
            Some(path) => checks.push(CheckResult::pass_with(tool, &path)),
            None => checks.push(CheckResult::fail(
                tool,
                &format!("Not found. Install '{package}' package. {purpose}"),
            )),
        }
    }

    for (tool, package, purpose) in OPTIONAL_TOOLS {
        match process::which(tool) {
            Some(path) => checks.push(CheckResult::pass_with(tool, &path)),
            None => checks.push(CheckResult::warn(
                tool,
                &format!("Not found. Install '{package}' package. {purpose}"),
            )),
        }
    }

    PreflightReport { checks }
}
