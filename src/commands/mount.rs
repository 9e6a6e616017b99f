//! Mount command - attach an image and leave it mounted.
//!
//! Unlike every other command, leaving the binding and mount behind is the
//! user-facing outcome here; `umount` undoes it later.

use anyhow::Result;

use crate::config::BackupConfig;
use crate::disk;
use crate::errors::BackupError;
use crate::image;
use crate::interrupt::CancelToken;
use crate::loopdev::{self, AttachPolicy, Resolved};
use crate::preflight;
use crate::{commands, mount};

/// Execute the mount command.
pub fn cmd_mount(cfg: &BackupConfig, token: &CancelToken) -> Result<()> {
    preflight::require_root()?;

    let creating = !cfg.image.exists();
    if creating && !cfg.create {
        return Err(BackupError::Validation(format!(
            "image {} does not exist (pass -c to create it)",
            cfg.image.display()
        ))
        .into());
    }

    let mut tools: Vec<&[preflight::Tool]> =
        vec![preflight::ATTACH_TOOLS, preflight::MOUNT_TOOLS];
    if creating {
        tools.push(preflight::CREATE_TOOLS);
        tools.push(preflight::IDENTITY_TOOLS);
    }
    preflight::require(&tools)?;

    mount::validate_mount_dir(&cfg.mount_dir, cfg.user_supplied_mount)?;

    let slot = match loopdev::resolve(&cfg.image, AttachPolicy::RequireFree)? {
        Resolved::Free(slot) => slot,
        Resolved::Existing(_) => unreachable!("RequireFree never yields an existing binding"),
    };

    commands::with_teardown(cfg, |live| {
        if creating {
            let geometry = match cfg.size_mb {
                Some(mb) => image::Geometry {
                    blocks: mb,
                    block_size: image::FIXED_BLOCK_SIZE,
                },
                None => image::device_geometry(&cfg.source_device)?,
            };
            println!(
                "Creating {} ({} MiB sparse)...",
                cfg.image.display(),
                geometry.bytes() / (1024 * 1024)
            );
            image::create(&cfg.image, geometry.blocks, geometry.block_size)?;
            token.check()?;

            disk::initialize(cfg, &slot, token, live)?;
            token.check()?;
        }

        let binding = mount::ensure_attached(&cfg.image)?;
        live.attached(&binding.device, &cfg.mount_dir, cfg.user_supplied_mount);
        token.check()?;

        mount::mount(&binding, &cfg.mount_dir, cfg.user_supplied_mount)?;

        // Deliberately left attached and mounted; that is what `mount` is for.
        live.released();
        println!(
            "{} mounted at {} (device {})",
            cfg.image.display(),
            cfg.mount_dir.display(),
            binding.device
        );
        Ok(())
    })
}
