//! Gzip command - compress an image without running a backup first.

use anyhow::Result;

use crate::commands;
use crate::compress;
use crate::config::BackupConfig;
use crate::errors::BackupError;
use crate::interrupt::CancelToken;
use crate::preflight;

/// Execute the gzip command.
pub fn cmd_gzip(cfg: &BackupConfig, token: &CancelToken) -> Result<()> {
    preflight::require_root()?;
    preflight::require(&[preflight::COMPRESS_TOOLS])?;
    commands::require_image(cfg)?;

    if !cfg.force && cfg.compressed_path.exists() {
        return Err(BackupError::Validation(format!(
            "{} already exists (pass -f to overwrite)",
            cfg.compressed_path.display()
        ))
        .into());
    }

    commands::with_teardown(cfg, |live| {
        compress::compress(
            &cfg.image,
            &cfg.compressed_path,
            cfg.delete_after,
            token,
            live,
        )
    })
}
