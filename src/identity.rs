//! Source-to-image identity cloning.
//!
//! Boot and mount tooling on the device recognize the card by its
//! filesystem UUID and partition-table identifier, so both are copied from
//! the source onto the image. Cloning is one-directional and destroys the
//! image's prior identity.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::config::BackupConfig;
use crate::interrupt::LiveState;
use crate::loopdev;
use crate::process::Cmd;

/// Clone the source device's filesystem UUID and partition-table UUID onto
/// the image.
///
/// Attaches the image if nothing holds it, and always detaches afterwards,
/// whether or not the attachment pre-existed this call.
pub fn clone_identity(cfg: &BackupConfig, live: &mut LiveState) -> Result<()> {
    println!("Cloning identity from {}", cfg.source_device.display());

    let src_part = loopdev::partition_node(&cfg.source_device, 1);
    let fs_uuid = blkid_value(&src_part, "UUID")?;
    let pt_uuid = blkid_value(&cfg.source_device, "PTUUID")?;

    let binding = match loopdev::find_binding(&cfg.image)? {
        Some(binding) => binding,
        None => {
            let slot = loopdev::next_free_slot()?;
            let binding = loopdev::attach(&slot, &cfg.image)?;
            loopdev::rescan(&binding.device)?;
            binding
        }
    };
    live.attached(&binding.device, &cfg.mount_dir, cfg.user_supplied_mount);

    let part = binding.partition(1);

    // The filesystem must be clean before its UUID changes.
    repair_check(&part)?;

    Cmd::new("tune2fs")
        .arg("-U")
        .arg(&fs_uuid)
        .arg_path(&part)
        .error_msg(format!("Failed to set filesystem UUID on {}", part.display()))
        .run()?;

    // Rewrite the disk identifier through fdisk's expert menu. fdisk exits
    // non-zero when the kernel refuses the table re-read on a busy device
    // even though the write succeeded; partprobe below re-reads for us.
    let script = format!("x\ni\n0x{pt_uuid}\nr\nw\n");
    let result = Cmd::new("fdisk")
        .arg(&binding.device)
        .stdin(script)
        .allow_fail()
        .run()?;
    if !result.success() && !result.stdout.contains("The partition table has been altered") {
        bail!(
            "Failed to rewrite the partition-table identifier on {} (exit code {}):\n{}",
            binding.device,
            result.code(),
            result.stderr_trimmed()
        );
    }
    loopdev::rescan(&binding.device)?;

    // Flush everything to stable storage before letting go.
    Cmd::new("sync").error_msg("sync failed").run()?;

    loopdev::detach(&binding.device)?;
    live.released();

    println!("  UUID {fs_uuid}, PTUUID {pt_uuid}");
    Ok(())
}

/// Read one blkid tag from a device node.
fn blkid_value(node: &Path, tag: &str) -> Result<String> {
    let result = Cmd::new("blkid")
        .args(["-s", tag, "-o", "value"])
        .arg_path(node)
        .error_msg(format!("Failed to read {tag} of {}", node.display()))
        .run()?;
    let value = result.stdout_trimmed().to_string();
    if value.is_empty() {
        bail!("{} has no {tag}", node.display());
    }
    Ok(value)
}

/// Filesystem consistency check in auto-repair mode.
///
/// e2fsck exit codes 0..=2 mean clean or repaired; anything higher is a
/// real failure.
pub fn repair_check(part: &Path) -> Result<()> {
    let result = Cmd::new("e2fsck")
        .args(["-f", "-y"])
        .arg_path(part)
        .allow_fail()
        .run()
        .context("Failed to run e2fsck")?;
    if result.code() > 2 {
        bail!(
            "Filesystem check failed on {} (exit code {}):\n{}",
            part.display(),
            result.code(),
            result.stderr_trimmed()
        );
    }
    Ok(())
}
