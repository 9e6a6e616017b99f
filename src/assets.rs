//! Bootloader payload cache.
//!
//! The two boot stages are fetched once from the configured base URL into
//! `~/.cache/sdmirror/` and reused for every subsequent image.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::errors::BackupError;
use crate::process::Cmd;

/// First-stage payload, written at byte offset 512 of the raw device.
pub const STAGE1_NAME: &str = "2ndboot.bin";

/// Second-stage payload, written at byte offset 70656.
pub const STAGE2_NAME: &str = "bootloader.img";

/// Local cache directory for fetched payloads.
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/var/cache"))
        .join("sdmirror")
}

/// Return the cached path of a payload, fetching it on first use.
///
/// A payload that is still absent (or empty) after the fetch attempt is
/// fatal: a half-seeded boot area produces an image that will not boot.
pub fn payload(name: &str, base_url: &str) -> Result<PathBuf> {
    let dir = cache_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;

    let path = dir.join(name);
    if !path.exists() {
        let url = format!("{}/{}", base_url.trim_end_matches('/'), name);
        println!("  Fetching {name} from {url}");
        let _ = Cmd::new("curl")
            .args(["-fsSL", "-o"])
            .arg_path(&path)
            .arg(&url)
            .allow_fail()
            .run()?;
    }

    let usable = fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
    if !usable {
        let _ = fs::remove_file(&path);
        return Err(BackupError::BootloaderAssetMissing(name.to_string()).into());
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_dir_ends_with_crate_name() {
        assert!(cache_dir().ends_with("sdmirror"));
    }
}
