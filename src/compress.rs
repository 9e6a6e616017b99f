//! Streaming compression of an image into its `.gz` companion.
//!
//! Bytes flow image -> pv -> gzip -> `<image>.gz.tmp`; the temporary is
//! promoted onto the final path by rename only when it is non-empty, so a
//! half-written artifact can never shadow a good one. pv reports progress
//! on stderr while gzip writes the stream.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::interrupt::{CancelToken, LiveState};

/// Temporary sibling used while the stream is in flight.
pub fn tmp_path(compressed: &Path) -> PathBuf {
    let mut name = compressed.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Compress `image` into `compressed`, optionally deleting the source.
///
/// `live` learns about the temporary file before the stream starts, so the
/// interrupt teardown can remove it if the run dies mid-stream.
pub fn compress(
    image: &Path,
    compressed: &Path,
    delete_source: bool,
    token: &CancelToken,
    live: &mut LiveState,
) -> Result<()> {
    let tmp = tmp_path(compressed);
    live.compression_tmp = Some(tmp.clone());

    println!("Compressing {} -> {}", image.display(), compressed.display());
    let streamed = stream(image, &tmp).and_then(|()| token.check());
    if let Err(e) = streamed {
        let _ = fs::remove_file(&tmp);
        live.compression_tmp = None;
        return Err(e);
    }

    promote(&tmp, compressed)?;
    live.compression_tmp = None;

    if delete_source {
        fs::remove_file(image)
            .with_context(|| format!("Failed to delete {}", image.display()))?;
        println!("Deleted source image {}", image.display());
    }
    Ok(())
}

/// Run the pv | gzip pipeline into the temporary file.
fn stream(image: &Path, tmp: &Path) -> Result<()> {
    let out = File::create(tmp)
        .with_context(|| format!("Failed to create {}", tmp.display()))?;

    let mut pv = Command::new("pv")
        .arg(image)
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .context("Failed to execute 'pv'. Is it installed?")?;
    let pv_out = pv
        .stdout
        .take()
        .context("Failed to capture pv output")?;

    let mut gzip = Command::new("gzip")
        .stdin(Stdio::from(pv_out))
        .stdout(Stdio::from(out))
        .spawn()
        .context("Failed to execute 'gzip'. Is it installed?")?;

    let gzip_status = gzip.wait().context("Failed to wait for gzip")?;
    let pv_status = pv.wait().context("Failed to wait for pv")?;

    if !pv_status.success() {
        bail!("pv failed (exit code {})", pv_status.code().unwrap_or(-1));
    }
    if !gzip_status.success() {
        bail!("gzip failed (exit code {})", gzip_status.code().unwrap_or(-1));
    }
    Ok(())
}

/// Promote a finished temporary onto the final path.
///
/// Never installs an empty artifact: an empty temporary is removed and the
/// prior `.gz` (if any) is left untouched. The rename is atomic within the
/// directory.
pub fn promote(tmp: &Path, compressed: &Path) -> Result<()> {
    let len = fs::metadata(tmp).map(|m| m.len()).unwrap_or(0);
    if len == 0 {
        let _ = fs::remove_file(tmp);
        bail!(
            "compression produced no output; {} left untouched",
            compressed.display()
        );
    }
    fs::rename(tmp, compressed).with_context(|| {
        format!(
            "Failed to promote {} to {}",
            tmp.display(),
            compressed.display()
        )
    })?;
    println!("Compressed image ready at {}", compressed.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tmp_path_is_sibling() {
        assert_eq!(
            tmp_path(Path::new("/data/card.img.gz")),
            PathBuf::from("/data/card.img.gz.tmp")
        );
    }

    #[test]
    fn test_promote_refuses_empty_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let gz = dir.path().join("card.img.gz");
        let tmp = tmp_path(&gz);
        fs::write(&gz, b"previous artifact").unwrap();
        fs::write(&tmp, b"").unwrap();

        let err = promote(&tmp, &gz).unwrap_err();
        assert!(err.to_string().contains("no output"));
        assert!(!tmp.exists(), "empty tmp should be removed");
        assert_eq!(fs::read(&gz).unwrap(), b"previous artifact");
    }

    #[test]
    fn test_promote_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let gz = dir.path().join("card.img.gz");
        let tmp = tmp_path(&gz);
        fs::write(&gz, b"old").unwrap();
        fs::write(&tmp, b"new artifact").unwrap();

        promote(&tmp, &gz).unwrap();
        assert!(!tmp.exists());
        assert_eq!(fs::read(&gz).unwrap(), b"new artifact");
    }

    #[test]
    fn test_compress_failure_cleans_tmp() {
        // Streaming from a non-existent image makes pv fail; the temporary
        // must not survive.
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("missing.img");
        let gz = dir.path().join("missing.img.gz");

        let mut live = LiveState::default();
        let token = CancelToken::disconnected();
        let result = compress(&image, &gz, false, &token, &mut live);
        assert!(result.is_err());
        assert!(!tmp_path(&gz).exists());
        assert!(!gz.exists());
    }

    #[test]
    fn test_cancelled_compress_never_promotes() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("card.img");
        let gz = dir.path().join("card.img.gz");
        fs::write(&image, vec![0u8; 4096]).unwrap();

        let mut live = LiveState::default();
        let token = CancelToken::disconnected();
        token.cancel();
        let result = compress(&image, &gz, false, &token, &mut live);
        assert!(result.is_err());
        assert!(!gz.exists(), "a cancelled run must not promote");
        assert!(!tmp_path(&gz).exists(), "the temporary must be removed");
    }
}
