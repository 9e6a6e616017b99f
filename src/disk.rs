//! Disk initialization: partition table, filesystem, bootloader seeding.
//!
//! Turns a freshly allocated, unattached image into a bootable, formatted
//! disk. The sequence is strictly ordered; a failure aborts without rolling
//! back partial partitioning (the next `start -c` simply recreates the
//! image from scratch).

use anyhow::Result;
use std::path::Path;

use crate::assets;
use crate::config::BackupConfig;
use crate::identity;
use crate::interrupt::{CancelToken, LiveState};
use crate::loopdev;
use crate::process::Cmd;

/// First partition starts here, leaving room below for the boot stages.
const PART_START: &str = "4MiB";

/// Byte offsets of the two boot stages on the raw device.
pub const STAGE1_OFFSET: u64 = 512;
pub const STAGE2_OFFSET: u64 = 70656;

const SECTOR: u64 = 512;

/// Partition, format, and seed the bootloader on a new image.
///
/// `slot` is the free loop device the resolver picked. The binding is
/// detached before identity cloning so the cloner owns its own attach
/// cycle, and `live` tracks the attachment for the failure-path teardown.
pub fn initialize(
    cfg: &BackupConfig,
    slot: &str,
    token: &CancelToken,
    live: &mut LiveState,
) -> Result<()> {
    println!("Initializing {}...", cfg.image.display());

    // Fetch payloads up front: a missing boot stage must abort before the
    // partition table is touched.
    let stage1 = assets::payload(assets::STAGE1_NAME, &cfg.boot_asset_url)?;
    let stage2 = assets::payload(assets::STAGE2_NAME, &cfg.boot_asset_url)?;

    let binding = loopdev::attach(slot, &cfg.image)?;
    live.attached(&binding.device, &cfg.mount_dir, cfg.user_supplied_mount);

    println!("  Writing partition table on {}", binding.device);
    Cmd::new("parted")
        .args(["-s"])
        .arg(&binding.device)
        .args(["mklabel", "msdos"])
        .error_msg("Failed to write partition table")
        .run()?;
    token.check()?;

    Cmd::new("parted")
        .args(["-s"])
        .arg(&binding.device)
        .args(["mkpart", "primary", "ext4", PART_START, "100%"])
        .error_msg("Failed to create primary partition")
        .run()?;
    token.check()?;

    loopdev::rescan(&binding.device)?;

    let part = binding.partition(1);
    println!("  Creating ext4 filesystem on {}", part.display());
    Cmd::new("mkfs.ext4")
        .arg("-q")
        .arg_path(&part)
        .error_msg("Failed to create filesystem")
        .run()?;
    token.check()?;

    println!("  Seeding bootloader stages");
    seed_stage(&binding.device, &stage1, STAGE1_OFFSET)?;
    seed_stage(&binding.device, &stage2, STAGE2_OFFSET)?;
    token.check()?;

    loopdev::detach(&binding.device)?;
    live.released();

    identity::clone_identity(cfg, live)?;
    Ok(())
}

/// Write one boot stage at its byte offset with synchronous writes, without
/// truncating the device.
fn seed_stage(device: &str, payload: &Path, offset: u64) -> Result<()> {
    Cmd::new("dd")
        .arg(format!("if={}", payload.display()))
        .arg(format!("of={device}"))
        .arg(format!("bs={SECTOR}"))
        .arg(format!("seek={}", offset / SECTOR))
        .arg("conv=notrunc,fsync")
        .error_msg(format!(
            "Failed to write {} at offset {offset}",
            payload.display()
        ))
        .run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_offsets_are_sector_aligned() {
        assert_eq!(STAGE1_OFFSET % SECTOR, 0);
        assert_eq!(STAGE2_OFFSET % SECTOR, 0);
        assert_eq!(STAGE1_OFFSET / SECTOR, 1);
        assert_eq!(STAGE2_OFFSET / SECTOR, 138);
    }
}
