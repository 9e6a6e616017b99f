//! Cloneid command - copy source identity onto the image, standalone.

use anyhow::Result;

use crate::commands;
use crate::config::BackupConfig;
use crate::identity;
use crate::loopdev::{self, AttachPolicy};
use crate::preflight;

/// Execute the cloneid command.
///
/// Attaches the image itself and always detaches afterwards.
pub fn cmd_cloneid(cfg: &BackupConfig) -> Result<()> {
    preflight::require_root()?;
    preflight::require(&[preflight::ATTACH_TOOLS, preflight::IDENTITY_TOOLS])?;
    commands::require_image(cfg)?;

    // Reject a pre-existing binding up front; the cloner owns its own
    // attach/detach cycle.
    loopdev::resolve(&cfg.image, AttachPolicy::RequireFree)?;

    commands::with_teardown(cfg, |live| identity::clone_identity(cfg, live))
}
