//! Check command - filesystem consistency check of an attached image.

use anyhow::Result;

use crate::commands;
use crate::config::BackupConfig;
use crate::errors::BackupError;
use crate::identity;
use crate::loopdev::{self, AttachPolicy, Resolved};
use crate::preflight;

/// Execute the check command.
///
/// Operates on an existing binding (attach with `mount` first). The
/// repairing check refuses to touch a partition that is currently mounted.
pub fn cmd_check(cfg: &BackupConfig) -> Result<()> {
    preflight::require_root()?;
    preflight::require(&[preflight::ATTACH_TOOLS, preflight::CHECK_TOOLS])?;
    commands::require_image(cfg)?;

    let binding = match loopdev::resolve(&cfg.image, AttachPolicy::RequireBound)? {
        Resolved::Existing(binding) => binding,
        Resolved::Free(_) => unreachable!("RequireBound never yields a free slot"),
    };

    let part = binding.partition(1);
    if let Some(target) = loopdev::mount_location(&part) {
        return Err(BackupError::Validation(format!(
            "{} is mounted at {target}; unmount it before checking",
            part.display()
        ))
        .into());
    }

    println!("Checking {}...", part.display());
    identity::repair_check(&part)?;
    println!("Filesystem on {} is clean", part.display());
    Ok(())
}
