//! Loop device discovery, attachment, and resolution policy.
//!
//! The "next free slot" race (query `losetup -f`, then use the answer) is
//! inherent to the host's attachment mechanism. It lives entirely inside
//! this module so a more atomic primitive can replace it if the host grows
//! one; the resolver itself performs no attach or detach.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::errors::BackupError;
use crate::process::Cmd;

/// An attachment between an image file and a loop device node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Device node, e.g. `/dev/loop3`.
    pub device: String,
    /// The image file backing it.
    pub image: PathBuf,
}

impl Binding {
    /// Device node of partition `n` under this binding.
    pub fn partition(&self, n: u32) -> PathBuf {
        partition_node(Path::new(&self.device), n)
    }
}

/// Partition sub-node naming: devices whose name ends in a digit take a
/// `p` separator (`/dev/loop0` -> `/dev/loop0p1`, `/dev/mmcblk0` ->
/// `/dev/mmcblk0p1`), others append the number (`/dev/sda` -> `/dev/sda1`).
pub fn partition_node(device: &Path, n: u32) -> PathBuf {
    let s = device.to_string_lossy();
    if s.chars().last().is_some_and(|c| c.is_ascii_digit()) {
        PathBuf::from(format!("{s}p{n}"))
    } else {
        PathBuf::from(format!("{s}{n}"))
    }
}

/// How a command relates to existing attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachPolicy {
    /// Needs a fresh slot; an existing binding is an error.
    RequireFree,
    /// Operates on an existing binding; absence is an error (umount, check).
    RequireBound,
}

/// Outcome of attachment resolution.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// The image is already attached here.
    Existing(Binding),
    /// No binding exists; this is the next free slot to attach to.
    Free(String),
}

/// Pure classification of the discovered state against the command's policy.
///
/// Returns the existing binding to operate on, or None when the caller
/// should pick a free slot.
pub fn classify(
    image: &Path,
    existing: Option<Binding>,
    mounted_at: Option<String>,
    policy: AttachPolicy,
) -> Result<Option<Binding>, BackupError> {
    match (policy, existing) {
        (AttachPolicy::RequireBound, Some(binding)) => Ok(Some(binding)),
        (AttachPolicy::RequireBound, None) => Err(BackupError::NoBinding(image.to_path_buf())),
        (AttachPolicy::RequireFree, Some(binding)) => Err(BackupError::AlreadyAttached {
            image: image.to_path_buf(),
            device: binding.device,
            mounted_at,
        }),
        (AttachPolicy::RequireFree, None) => Ok(None),
    }
}

/// Resolve the binding an image should use for a command.
pub fn resolve(image: &Path, policy: AttachPolicy) -> Result<Resolved> {
    let existing = find_binding(image)?;
    // Best-effort: where is the partition mounted, if anywhere.
    let mounted_at = existing
        .as_ref()
        .and_then(|b| mount_location(&b.partition(1)));

    match classify(image, existing, mounted_at, policy)? {
        Some(binding) => Ok(Resolved::Existing(binding)),
        None => Ok(Resolved::Free(next_free_slot()?)),
    }
}

/// Find the loop device currently backed by an image, if any.
///
/// `losetup -j` prints lines like `/dev/loop3: [2049]:131073 (/path/img)`.
pub fn find_binding(image: &Path) -> Result<Option<Binding>> {
    let result = Cmd::new("losetup")
        .arg("-j")
        .arg_path(image)
        .error_msg("Failed to query loop attachments")
        .run()?;

    let device = result
        .stdout
        .lines()
        .filter_map(|line| line.split(':').next())
        .map(str::trim)
        .find(|d| !d.is_empty())
        .map(str::to_string);

    Ok(device.map(|device| Binding {
        device,
        image: image.to_path_buf(),
    }))
}

/// Ask the host for the next free loop slot.
pub fn next_free_slot() -> Result<String> {
    let result = Cmd::new("losetup")
        .arg("-f")
        .error_msg("No free loop device available")
        .run()?;
    Ok(result.stdout_trimmed().to_string())
}

/// Attach an image to a loop device.
pub fn attach(device: &str, image: &Path) -> Result<Binding> {
    Cmd::new("losetup")
        .arg(device)
        .arg_path(image)
        .error_msg(format!("Failed to attach {} to {}", image.display(), device))
        .run()?;
    Ok(Binding {
        device: device.to_string(),
        image: image.to_path_buf(),
    })
}

/// Re-scan a device so its partition sub-nodes appear.
pub fn rescan(device: &str) -> Result<()> {
    Cmd::new("partprobe")
        .arg(device)
        .error_msg(format!("Failed to re-scan partitions of {device}"))
        .run()?;
    Ok(())
}

/// Detach a loop device, dropping its partition sub-nodes first.
pub fn detach(device: &str) -> Result<()> {
    // partx may have nothing to remove (never scanned); that is fine.
    Cmd::new("partx").arg("-d").arg(device).allow_fail().run()?;
    Cmd::new("losetup")
        .arg("-d")
        .arg(device)
        .error_msg(format!("Failed to detach {device}"))
        .run()?;
    Ok(())
}

/// Where a device node is currently mounted, if the mount table knows it.
///
/// Absence of a mount record is not an error.
pub fn mount_location(node: &Path) -> Option<String> {
    let result = Cmd::new("findmnt")
        .args(["-n", "-o", "TARGET"])
        .arg_path(node)
        .allow_fail()
        .run()
        .ok()?;
    if !result.success() {
        return None;
    }
    let target = result.stdout_trimmed();
    if target.is_empty() {
        None
    } else {
        Some(target.to_string())
    }
}

/// True when a directory is currently a mount point.
pub fn is_mount_point(dir: &Path) -> bool {
    Cmd::new("findmnt")
        .arg_path(dir)
        .allow_fail()
        .run()
        .map(|r| r.success())
        .unwrap_or(false)
}
