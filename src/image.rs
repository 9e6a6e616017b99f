//! Sparse image allocation and companion-path bookkeeping.
//!
//! Images are allocated with the dd count=0/seek trick: the apparent size
//! is `blocks * block_size` but no data blocks are written, so the file
//! stays sparse until the first real backup fills it.

use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::errors::BackupError;
use crate::process::Cmd;

/// Block size forced when the operator gives an explicit `-s <MB>` size.
pub const FIXED_BLOCK_SIZE: u64 = 1024 * 1024;

/// How much `resize` grows an image by, in bytes.
pub const RESIZE_INCREMENT: u64 = 1024 * 1024 * 1024;

/// Source device geometry used to size a new image.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub blocks: u64,
    pub block_size: u64,
}

impl Geometry {
    pub fn bytes(&self) -> u64 {
        self.blocks * self.block_size
    }
}

/// Query sector count and sector size of a physical device.
pub fn device_geometry(device: &Path) -> Result<Geometry> {
    let size_bytes: u64 = Cmd::new("blockdev")
        .arg("--getsize64")
        .arg_path(device)
        .error_msg(format!("Failed to query size of {}", device.display()))
        .run()?
        .stdout_trimmed()
        .parse()
        .with_context(|| format!("blockdev returned a non-numeric size for {}", device.display()))?;

    let block_size: u64 = Cmd::new("blockdev")
        .arg("--getss")
        .arg_path(device)
        .error_msg(format!("Failed to query sector size of {}", device.display()))
        .run()?
        .stdout_trimmed()
        .parse()
        .with_context(|| {
            format!("blockdev returned a non-numeric sector size for {}", device.display())
        })?;

    Ok(Geometry {
        blocks: size_bytes / block_size,
        block_size,
    })
}

/// Allocate a sparse image of `blocks * block_size` apparent bytes.
///
/// Any stale file at the path is removed first (absence is fine). There is
/// no check that the requested size can hold the data being backed up;
/// that is the caller's responsibility.
pub fn create(path: &Path, blocks: u64, block_size: u64) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to remove stale {}", path.display()))
        }
    }

    Cmd::new("dd")
        .arg("if=/dev/zero")
        .arg(format!("of={}", path.display()))
        .arg(format!("bs={}", block_size))
        .arg("count=0")
        .arg(format!("seek={}", blocks))
        .error_msg(format!("Failed to allocate {}", path.display()))
        .run()?;

    let len = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if len == 0 {
        return Err(BackupError::CreationFailed(path.to_path_buf()).into());
    }
    Ok(())
}

/// Grow an image by the fixed resize increment, keeping it sparse.
///
/// Returns the new apparent size in bytes.
pub fn grow(path: &Path) -> Result<u64> {
    let len = fs::metadata(path)
        .with_context(|| format!("Cannot stat {}", path.display()))?
        .len();
    let new_len = len + RESIZE_INCREMENT;
    // Round the seek target up to a whole MiB so dd lands at or past new_len.
    let seek_mb = new_len.div_ceil(FIXED_BLOCK_SIZE);

    Cmd::new("dd")
        .arg("if=/dev/zero")
        .arg(format!("of={}", path.display()))
        .arg(format!("bs={}", FIXED_BLOCK_SIZE))
        .arg("count=0")
        .arg(format!("seek={}", seek_mb))
        .error_msg(format!("Failed to grow {}", path.display()))
        .run()?;

    Ok(seek_mb * FIXED_BLOCK_SIZE)
}

/// Companion compressed artifact: `<image>.gz`.
pub fn compressed_path(image: &Path) -> PathBuf {
    let mut name = image.as_os_str().to_os_string();
    name.push(".gz");
    PathBuf::from(name)
}

/// Companion transfer log: `<image>-<YYYYMMDDHHMMSS>.log`, stamped with the
/// time of invocation.
pub fn default_log_path(image: &Path) -> PathBuf {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    log_path_at(image, now)
}

/// Timestamped log path for a given instant (separated out for tests).
pub fn log_path_at(image: &Path, now: OffsetDateTime) -> PathBuf {
    let fmt = format_description!("[year][month][day][hour][minute][second]");
    let stamp = now
        .format(&fmt)
        .unwrap_or_else(|_| "00000000000000".to_string());
    let mut name = image.as_os_str().to_os_string();
    name.push(format!("-{stamp}.log"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_compressed_path_appends_gz() {
        assert_eq!(
            compressed_path(Path::new("/data/card.img")),
            PathBuf::from("/data/card.img.gz")
        );
    }

    #[test]
    fn test_log_path_stamp_format() {
        let at = datetime!(2024-03-07 09:05:42 UTC);
        assert_eq!(
            log_path_at(Path::new("card.img"), at),
            PathBuf::from("card.img-20240307090542.log")
        );
    }

    #[test]
    fn test_create_is_sparse() {
        use std::os::unix::fs::MetadataExt;

        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("test.img");

        // 64 MiB apparent size.
        create(&img, 64, FIXED_BLOCK_SIZE).unwrap();

        let meta = fs::metadata(&img).unwrap();
        assert_eq!(meta.len(), 64 * FIXED_BLOCK_SIZE);
        // st_blocks counts 512-byte units actually allocated; a sparse file
        // allocates far less than its apparent size.
        assert!(meta.blocks() * 512 < meta.len() / 4);
    }

    #[test]
    fn test_create_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("test.img");
        fs::write(&img, b"stale contents").unwrap();

        create(&img, 4, FIXED_BLOCK_SIZE).unwrap();
        assert_eq!(fs::metadata(&img).unwrap().len(), 4 * FIXED_BLOCK_SIZE);
    }

    #[test]
    fn test_grow_adds_one_gib() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("test.img");
        create(&img, 8, FIXED_BLOCK_SIZE).unwrap();

        let new_len = grow(&img).unwrap();
        assert_eq!(new_len, 8 * FIXED_BLOCK_SIZE + RESIZE_INCREMENT);
        assert_eq!(fs::metadata(&img).unwrap().len(), new_len);
    }
}
