//! CLI command handlers.
//!
//! Each submodule drives one lifecycle command. They share a pattern:
//! validate eagerly (privilege, tools, arguments), resolve the loop
//! binding, then sequence the mutating steps with the cancellation token
//! checked after every blocking subprocess. Failures of any kind fall
//! through `with_teardown`, so interrupt recovery and error recovery are
//! the same code path.

pub mod check;
pub mod cloneid;
pub mod gzip;
pub mod mount;
pub mod preflight;
pub mod resize;
pub mod showdf;
pub mod start;
pub mod umount;

pub use check::cmd_check;
pub use cloneid::cmd_cloneid;
pub use gzip::cmd_gzip;
pub use mount::cmd_mount;
pub use preflight::cmd_preflight;
pub use resize::cmd_resize;
pub use showdf::cmd_showdf;
pub use start::cmd_start;
pub use umount::cmd_umount;

use anyhow::Result;

use crate::config::BackupConfig;
use crate::errors::BackupError;
use crate::interrupt::{self, LiveState};

/// Run a command body with the unified failure-path teardown.
pub(crate) fn with_teardown<F>(cfg: &BackupConfig, body: F) -> Result<()>
where
    F: FnOnce(&mut LiveState) -> Result<()>,
{
    let mut live = LiveState::default();
    match body(&mut live) {
        Ok(()) => Ok(()),
        Err(e) => {
            interrupt::teardown(&live, cfg.log_path.as_deref());
            Err(e)
        }
    }
}

/// Eager check that the image file exists.
pub(crate) fn require_image(cfg: &BackupConfig) -> Result<()> {
    if !cfg.image.exists() {
        return Err(BackupError::Validation(format!(
            "image {} does not exist",
            cfg.image.display()
        ))
        .into());
    }
    Ok(())
}
