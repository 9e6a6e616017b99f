//! Configuration for a backup run.
//!
//! All option flags and derived paths collapse into one immutable
//! `BackupConfig`, built once after argument validation and passed
//! explicitly to every component. Environment variables (and a `.env`
//! file, loaded in `main`) override the built-in defaults; command-line
//! options override both.

use std::path::PathBuf;

use crate::image;

/// Device backed up when neither `-i` nor `SDMIRROR_SOURCE` is given.
pub const DEFAULT_SOURCE_DEVICE: &str = "/dev/mmcblk0";

/// Where the two bootloader payloads are fetched from on first use.
/// Override with `SDMIRROR_BOOT_URL`.
pub const DEFAULT_BOOT_ASSET_URL: &str =
    "https://raw.githubusercontent.com/friendlyarm/sd-fuse_nanopi2/master/prebuilt";

/// Raw command-line options before derivation.
#[derive(Debug, Default, Clone)]
pub struct Options {
    pub create: bool,
    pub compress: bool,
    pub delete_after: bool,
    pub force: bool,
    pub log: bool,
    pub log_file: Option<PathBuf>,
    pub source: Option<PathBuf>,
    pub size_mb: Option<u64>,
    pub mount_dir: Option<PathBuf>,
}

/// Immutable configuration for one invocation.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// The disk image being operated on.
    pub image: PathBuf,
    /// Physical device the backup reads from.
    pub source_device: PathBuf,
    /// Explicit image size in MiB (`-s`); None means "match the source device".
    pub size_mb: Option<u64>,
    /// Create the image first if it does not exist (`-c`).
    pub create: bool,
    /// Compress the image after the backup (`-z`, implied by `-d`).
    pub compress: bool,
    /// Delete the image after successful compression (`-d`).
    pub delete_after: bool,
    /// Overwrite an existing compressed artifact (`-f`).
    pub force: bool,
    /// Transfer log destination; None disables logging.
    pub log_path: Option<PathBuf>,
    /// Where the compressed artifact lands (`<image>.gz`).
    pub compressed_path: PathBuf,
    /// Mount directory for this run.
    pub mount_dir: PathBuf,
    /// True when the operator supplied the mount directory themselves.
    pub user_supplied_mount: bool,
    /// Base URL for bootloader payload fetches.
    pub boot_asset_url: String,
}

impl BackupConfig {
    /// Build the configuration for an image from CLI options and environment.
    pub fn build(image: PathBuf, opts: Options) -> Self {
        let source_device = opts
            .source
            .or_else(|| std::env::var("SDMIRROR_SOURCE").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCE_DEVICE));

        let boot_asset_url = std::env::var("SDMIRROR_BOOT_URL")
            .unwrap_or_else(|_| DEFAULT_BOOT_ASSET_URL.to_string());

        // An explicit log file wins; `-l` selects the timestamped default.
        let log_path = match (&opts.log_file, opts.log) {
            (Some(path), _) => Some(path.clone()),
            (None, true) => Some(image::default_log_path(&image)),
            (None, false) => None,
        };

        let (mount_dir, user_supplied_mount) = match opts.mount_dir {
            Some(dir) => (dir, true),
            None => (crate::mount::default_mount_dir(&image), false),
        };

        let compressed_path = image::compressed_path(&image);

        Self {
            image,
            source_device,
            size_mb: opts.size_mb,
            create: opts.create,
            // Deleting the source only makes sense after compressing it.
            compress: opts.compress || opts.delete_after,
            delete_after: opts.delete_after,
            force: opts.force,
            log_path,
            compressed_path,
            mount_dir,
            user_supplied_mount,
            boot_asset_url,
        }
    }

    /// Print the effective configuration.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  Image:         {}", self.image.display());
        println!("  Source device: {}", self.source_device.display());
        println!("  Mount dir:     {}", self.mount_dir.display());
        match &self.log_path {
            Some(log) => println!("  Log:           {}", log.display()),
            None => println!("  Log:           disabled"),
        }
        if self.compress {
            println!("  Compress to:   {}", self.compressed_path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_implies_compress() {
        let cfg = BackupConfig::build(
            PathBuf::from("card.img"),
            Options {
                delete_after: true,
                ..Default::default()
            },
        );
        assert!(cfg.compress);
        assert!(cfg.delete_after);
    }

    #[test]
    fn test_explicit_log_file_wins_over_default() {
        let cfg = BackupConfig::build(
            PathBuf::from("card.img"),
            Options {
                log: true,
                log_file: Some(PathBuf::from("/var/log/backup.log")),
                ..Default::default()
            },
        );
        assert_eq!(cfg.log_path, Some(PathBuf::from("/var/log/backup.log")));
    }

    #[test]
    fn test_no_log_by_default() {
        let cfg = BackupConfig::build(PathBuf::from("card.img"), Options::default());
        assert_eq!(cfg.log_path, None);
    }

    #[test]
    fn test_user_mount_dir_marked_user_supplied() {
        let cfg = BackupConfig::build(
            PathBuf::from("card.img"),
            Options {
                mount_dir: Some(PathBuf::from("/mnt/card")),
                ..Default::default()
            },
        );
        assert!(cfg.user_supplied_mount);
        assert_eq!(cfg.mount_dir, PathBuf::from("/mnt/card"));
    }

    #[test]
    fn test_default_mount_dir_derived_from_image() {
        let cfg = BackupConfig::build(PathBuf::from("/data/card.img"), Options::default());
        assert!(!cfg.user_supplied_mount);
        assert_eq!(cfg.mount_dir, PathBuf::from("/data/card.img.mnt"));
    }
}
