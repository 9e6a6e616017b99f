//! Showdf command - report filesystem usage inside an image.
//!
//! Mounts the image temporarily, prints the usage report, and restores the
//! host to its prior state.

use anyhow::Result;

use crate::commands;
use crate::config::BackupConfig;
use crate::loopdev::{self, AttachPolicy, Resolved};
use crate::preflight;
use crate::process::Cmd;
use crate::{interrupt, mount};

/// Execute the showdf command.
pub fn cmd_showdf(cfg: &BackupConfig, token: &interrupt::CancelToken) -> Result<()> {
    preflight::require_root()?;
    preflight::require(&[
        preflight::ATTACH_TOOLS,
        preflight::MOUNT_TOOLS,
        preflight::DF_TOOLS,
    ])?;
    commands::require_image(cfg)?;
    mount::validate_mount_dir(&cfg.mount_dir, cfg.user_supplied_mount)?;

    match loopdev::resolve(&cfg.image, AttachPolicy::RequireFree)? {
        Resolved::Free(_) => {}
        Resolved::Existing(_) => unreachable!("RequireFree never yields an existing binding"),
    }

    commands::with_teardown(cfg, |live| {
        let binding = mount::ensure_attached(&cfg.image)?;
        live.attached(&binding.device, &cfg.mount_dir, cfg.user_supplied_mount);
        token.check()?;

        mount::mount(&binding, &cfg.mount_dir, cfg.user_supplied_mount)?;
        live.mounted();

        let report = Cmd::new("df")
            .arg("-h")
            .arg_path(&cfg.mount_dir)
            .error_msg("Failed to query filesystem usage")
            .run()?;
        println!("{}", report.stdout_trimmed());

        mount::unmount(&binding, &cfg.mount_dir, cfg.user_supplied_mount)?;
        live.released();
        Ok(())
    })
}
