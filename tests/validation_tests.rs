//! Validation-layer tests: resolution policy, configuration precedence,
//! companion paths, and the fixed exclusion set.
//!
//! Everything here runs without root and without touching loop devices.

mod helpers;

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serial_test::serial;

use sdmirror::config::{BackupConfig, Options, DEFAULT_SOURCE_DEVICE};
use sdmirror::errors::BackupError;
use sdmirror::loopdev::{classify, AttachPolicy, Binding};
use sdmirror::{image, mount, sync};

use helpers::TestEnv;

fn binding(device: &str, image: &str) -> Binding {
    Binding {
        device: device.to_string(),
        image: PathBuf::from(image),
    }
}

// =============================================================================
// Attachment resolution
// =============================================================================

#[test]
fn test_start_rejected_when_image_already_attached() {
    let err = classify(
        Path::new("card.img"),
        Some(binding("/dev/loop4", "card.img")),
        Some("/mnt/card".to_string()),
        AttachPolicy::RequireFree,
    )
    .unwrap_err();

    match err {
        BackupError::AlreadyAttached {
            device, mounted_at, ..
        } => {
            assert_eq!(device, "/dev/loop4");
            assert_eq!(mounted_at.as_deref(), Some("/mnt/card"));
        }
        other => panic!("expected AlreadyAttached, got {other:?}"),
    }
}

#[test]
fn test_umount_rejected_without_binding() {
    let err = classify(
        Path::new("card.img"),
        None,
        None,
        AttachPolicy::RequireBound,
    )
    .unwrap_err();
    assert!(matches!(err, BackupError::NoBinding(_)));
}

#[test]
fn test_umount_accepts_existing_binding() {
    let resolved = classify(
        Path::new("card.img"),
        Some(binding("/dev/loop1", "card.img")),
        None,
        AttachPolicy::RequireBound,
    )
    .unwrap();
    assert_eq!(resolved, Some(binding("/dev/loop1", "card.img")));
}

#[test]
fn test_fresh_image_resolves_to_free_slot() {
    let resolved = classify(
        Path::new("card.img"),
        None,
        None,
        AttachPolicy::RequireFree,
    )
    .unwrap();
    assert_eq!(resolved, None);
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
#[serial]
fn test_source_device_flag_beats_environment() {
    std::env::set_var("SDMIRROR_SOURCE", "/dev/sdz");
    let cfg = BackupConfig::build(
        PathBuf::from("card.img"),
        Options {
            source: Some(PathBuf::from("/dev/mmcblk1")),
            ..Default::default()
        },
    );
    std::env::remove_var("SDMIRROR_SOURCE");
    assert_eq!(cfg.source_device, PathBuf::from("/dev/mmcblk1"));
}

#[test]
#[serial]
fn test_source_device_environment_beats_default() {
    std::env::set_var("SDMIRROR_SOURCE", "/dev/sdz");
    let cfg = BackupConfig::build(PathBuf::from("card.img"), Options::default());
    std::env::remove_var("SDMIRROR_SOURCE");
    assert_eq!(cfg.source_device, PathBuf::from("/dev/sdz"));
}

#[test]
#[serial]
fn test_source_device_default() {
    std::env::remove_var("SDMIRROR_SOURCE");
    let cfg = BackupConfig::build(PathBuf::from("card.img"), Options::default());
    assert_eq!(cfg.source_device, PathBuf::from(DEFAULT_SOURCE_DEVICE));
}

#[test]
fn test_compressed_companion_path() {
    let cfg = BackupConfig::build(PathBuf::from("/backups/card.img"), Options::default());
    assert_eq!(cfg.compressed_path, PathBuf::from("/backups/card.img.gz"));
}

#[test]
fn test_default_log_name_is_timestamped() {
    let cfg = BackupConfig::build(
        PathBuf::from("card.img"),
        Options {
            log: true,
            ..Default::default()
        },
    );
    let log = cfg.log_path.expect("-l must derive a log path");
    let name = log.to_string_lossy().into_owned();
    let pattern = Regex::new(r"^card\.img-\d{14}\.log$").unwrap();
    assert!(pattern.is_match(&name), "unexpected log name: {name}");
}

// =============================================================================
// Mount directory rules
// =============================================================================

#[test]
fn test_preexisting_default_mount_dir_is_rejected() {
    let env = TestEnv::new();
    let default_dir = mount::default_mount_dir(&env.image);
    fs::create_dir(&default_dir).unwrap();

    let err = mount::validate_mount_dir(&default_dir, false).unwrap_err();
    assert!(matches!(err, BackupError::Validation(_)));
}

#[test]
fn test_default_mount_dir_leaves_no_residue() {
    let env = TestEnv::new();
    let default_dir = mount::default_mount_dir(&env.image);

    mount::create_mount_dir(&default_dir, false).unwrap();
    assert!(default_dir.is_dir());
    mount::remove_mount_dir(&default_dir, false);
    assert!(!default_dir.exists());
}

#[test]
fn test_user_mount_dir_persists_unchanged() {
    let env = TestEnv::new();
    let user_dir = env.dir().join("inspect");
    fs::create_dir(&user_dir).unwrap();
    fs::write(user_dir.join("marker"), b"keep me").unwrap();

    assert!(mount::validate_mount_dir(&user_dir, true).is_ok());
    mount::create_mount_dir(&user_dir, true).unwrap();
    mount::remove_mount_dir(&user_dir, true);

    assert!(user_dir.is_dir());
    assert_eq!(fs::read(user_dir.join("marker")).unwrap(), b"keep me");
}

// =============================================================================
// Sync exclusions
// =============================================================================

#[test]
fn test_exclusion_set_covers_the_spec() {
    let required = [
        "/tmp/*",
        "/proc/*",
        "/run/*",
        "/sys/*",
        "lost+found",
        "/var/swap",
        "/var/cache/apt/archives/*",
        "/var/lib/docker/*",
        "/mnt/*",
    ];
    for pattern in required {
        assert!(
            sync::EXCLUDES.contains(&pattern),
            "exclusion set is missing {pattern}"
        );
    }
}

// =============================================================================
// Image store
// =============================================================================

#[test]
fn test_create_size_matches_block_math() {
    let env = TestEnv::new();
    // 100 MiB via the explicit-size path: 100 blocks of 1 MiB.
    image::create(&env.image, 100, image::FIXED_BLOCK_SIZE).unwrap();
    let meta = fs::metadata(&env.image).unwrap();
    assert_eq!(meta.len(), 100 * 1024 * 1024);
}

#[test]
fn test_create_is_sparse_not_zero_filled() {
    use std::os::unix::fs::MetadataExt;

    let env = TestEnv::new();
    image::create(&env.image, 256, image::FIXED_BLOCK_SIZE).unwrap();
    let meta = fs::metadata(&env.image).unwrap();

    // Apparent size is 256 MiB; allocated blocks must be a tiny fraction.
    assert_eq!(meta.len(), 256 * 1024 * 1024);
    assert!(
        meta.blocks() * 512 < 1024 * 1024,
        "image was written with real zeros ({} bytes allocated)",
        meta.blocks() * 512
    );
}
