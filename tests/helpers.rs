//! Shared test utilities for sdmirror tests.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Test environment with a temporary directory holding an image path.
pub struct TestEnv {
    /// Temporary directory (kept alive for the lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Path where tests place the disk image
    pub image: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let image = temp_dir.path().join("card.img");
        Self {
            _temp_dir: temp_dir,
            image,
        }
    }

    pub fn dir(&self) -> &Path {
        self._temp_dir.path()
    }
}

/// True when the test process runs as root; device-level tests need it.
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}
