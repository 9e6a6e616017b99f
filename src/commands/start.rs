//! Start command - one full backup cycle.
//!
//! Optionally creates and initializes the image, then mounts it, syncs the
//! running root filesystem into it, unmounts, and optionally compresses.

use anyhow::Result;
use std::time::Instant;

use crate::config::BackupConfig;
use crate::disk;
use crate::errors::BackupError;
use crate::image;
use crate::interrupt::CancelToken;
use crate::loopdev::{self, AttachPolicy, Resolved};
use crate::mount;
use crate::preflight;
use crate::sync;
use crate::{commands, compress};

/// Execute the start command.
pub fn cmd_start(cfg: &BackupConfig, token: &CancelToken) -> Result<()> {
    preflight::require_root()?;

    let creating = !cfg.image.exists();
    if creating && !cfg.create {
        return Err(BackupError::Validation(format!(
            "image {} does not exist (pass -c to create it)",
            cfg.image.display()
        ))
        .into());
    }

    let mut tools: Vec<&[preflight::Tool]> = vec![
        preflight::ATTACH_TOOLS,
        preflight::MOUNT_TOOLS,
        preflight::SYNC_TOOLS,
    ];
    if creating {
        tools.push(preflight::CREATE_TOOLS);
        tools.push(preflight::IDENTITY_TOOLS);
    }
    if cfg.compress {
        tools.push(preflight::COMPRESS_TOOLS);
    }
    preflight::require(&tools)?;

    mount::validate_mount_dir(&cfg.mount_dir, cfg.user_supplied_mount)?;
    if cfg.compress && !cfg.force && cfg.compressed_path.exists() {
        return Err(BackupError::Validation(format!(
            "{} already exists (pass -f to overwrite)",
            cfg.compressed_path.display()
        ))
        .into());
    }

    let slot = match loopdev::resolve(&cfg.image, AttachPolicy::RequireFree)? {
        Resolved::Free(slot) => slot,
        Resolved::Existing(_) => unreachable!("RequireFree never yields an existing binding"),
    };

    println!("=== Backup of {} ===\n", cfg.source_device.display());
    let run_start = Instant::now();

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
        live.mounted();
        token.check()?;

        println!("Syncing / -> {}", cfg.mount_dir.display());
        sync::run(&cfg.mount_dir, cfg.log_path.as_deref())?;
        token.check()?;

        mount::unmount(&binding, &cfg.mount_dir, cfg.user_supplied_mount)?;
        live.released();
        token.check()?;

        if cfg.compress {
            compress::compress(
                &cfg.image,
                &cfg.compressed_path,
                cfg.delete_after,
                token,
                live,
            )?;
        }

        if let Some(log) = &cfg.log_path {
            println!("Transfer log: {}", log.display());
        }
        let secs = run_start.elapsed().as_secs_f64();
        if secs >= 60.0 {
            println!("\n=== Backup Complete ({:.1}m) ===", secs / 60.0);
        } else {
            println!("\n=== Backup Complete ({:.1}s) ===", secs);
        }
        Ok(())
    })
}
