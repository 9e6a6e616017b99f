//! Resize command - grow an image by a fixed 1 GiB increment.
//!
//! The image file grows sparsely, then the primary partition and its
//! filesystem are expanded to fill the new space. There is no shrink and
//! no target-size option.

use anyhow::Result;

use crate::commands;
use crate::config::BackupConfig;
use crate::identity;
use crate::image;
use crate::interrupt::CancelToken;
use crate::loopdev::{self, AttachPolicy, Resolved};
use crate::preflight;
use crate::process::Cmd;

/// Execute the resize command.
pub fn cmd_resize(cfg: &BackupConfig, token: &CancelToken) -> Result<()> {
    preflight::require_root()?;
    preflight::require(&[preflight::ATTACH_TOOLS, preflight::RESIZE_TOOLS])?;
    commands::require_image(cfg)?;

    let slot = match loopdev::resolve(&cfg.image, AttachPolicy::RequireFree)? {
        Resolved::Free(slot) => slot,
        Resolved::Existing(_) => unreachable!("RequireFree never yields an existing binding"),
    };

    commands::with_teardown(cfg, |live| {
        let new_len = image::grow(&cfg.image)?;
        println!(
            "Grew {} to {} MiB",
            cfg.image.display(),
            new_len / (1024 * 1024)
        );
        token.check()?;

        let binding = loopdev::attach(&slot, &cfg.image)?;
        live.attached(&binding.device, &cfg.mount_dir, cfg.user_supplied_mount);
        loopdev::rescan(&binding.device)?;
        token.check()?;

        Cmd::new("parted")
            .args(["-s"])
            .arg(&binding.device)
            .args(["resizepart", "1", "100%"])
            .error_msg("Failed to grow the partition")
            .run()?;
        loopdev::rescan(&binding.device)?;
        token.check()?;

        let part = binding.partition(1);
        identity::repair_check(&part)?;
        Cmd::new("resize2fs")
            .arg_path(&part)
            .error_msg("Failed to grow the filesystem")
            .run()?;
        token.check()?;

        loopdev::detach(&binding.device)?;
        live.released();

        println!("Resize complete");
        Ok(())
    })
}
