//! Umount command - tear down a mount left behind by `mount`.

use anyhow::Result;

use crate::config::BackupConfig;
use crate::errors::BackupError;
use crate::loopdev::{self, AttachPolicy, Resolved};
use crate::preflight;
use crate::{commands, mount};

/// Execute the umount command.
pub fn cmd_umount(cfg: &BackupConfig) -> Result<()> {
    preflight::require_root()?;
    preflight::require(&[preflight::ATTACH_TOOLS, preflight::MOUNT_TOOLS])?;
    commands::require_image(cfg)?;

    // The mount directory must already exist, wherever it came from.
    if !cfg.mount_dir.is_dir() {
        return Err(BackupError::Validation(format!(
            "mount directory {} does not exist",
            cfg.mount_dir.display()
        ))
        .into());
    }

    let binding = match loopdev::resolve(&cfg.image, AttachPolicy::RequireBound)? {
        Resolved::Existing(binding) => binding,
        Resolved::Free(_) => unreachable!("RequireBound never yields a free slot"),
    };

    mount::unmount(&binding, &cfg.mount_dir, cfg.user_supplied_mount)?;
    println!("{} unmounted and detached", cfg.image.display());
    Ok(())
}
