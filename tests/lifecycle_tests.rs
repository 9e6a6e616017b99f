//! Lifecycle tests: compression promotion, interrupt recovery, resizing,
//! and (root-only) real loop-device cycles.

mod helpers;

use std::fs;

use sdmirror::compress;
use sdmirror::errors::BackupError;
use sdmirror::image;
use sdmirror::interrupt::{self, CancelToken, LiveState};
use sdmirror::loopdev;

use helpers::{is_root, TestEnv};

// =============================================================================
// Compression promotion
// =============================================================================

#[test]
fn test_promotion_never_installs_empty_artifact() {
    let env = TestEnv::new();
    let gz = env.dir().join("card.img.gz");
    let tmp = compress::tmp_path(&gz);
    fs::write(&gz, b"good artifact").unwrap();
    fs::write(&tmp, b"").unwrap();

    assert!(compress::promote(&tmp, &gz).is_err());
    assert_eq!(fs::read(&gz).unwrap(), b"good artifact");
    assert!(!tmp.exists());
}

#[test]
fn test_promotion_replaces_previous_artifact() {
    let env = TestEnv::new();
    let gz = env.dir().join("card.img.gz");
    let tmp = compress::tmp_path(&gz);
    fs::write(&gz, b"old").unwrap();
    fs::write(&tmp, b"fresh compressed bytes").unwrap();

    compress::promote(&tmp, &gz).unwrap();
    assert_eq!(fs::read(&gz).unwrap(), b"fresh compressed bytes");
    assert!(!tmp.exists());
}

#[test]
fn test_interrupted_compression_removes_tmp_and_keeps_gz() {
    // Simulates the interrupt handler firing while a partial temporary
    // exists: the temporary goes away, the prior artifact stays.
    let env = TestEnv::new();
    let gz = env.dir().join("card.img.gz");
    let tmp = compress::tmp_path(&gz);
    fs::write(&gz, b"prior artifact").unwrap();
    fs::write(&tmp, b"truncated mid-stream").unwrap();

    let live = LiveState {
        compression_tmp: Some(tmp.clone()),
        session: None,
    };
    interrupt::teardown(&live, None);

    assert!(!tmp.exists(), "interrupt must remove the temporary");
    assert_eq!(fs::read(&gz).unwrap(), b"prior artifact");
}

#[test]
fn test_cancellation_surfaces_as_interrupted_error() {
    let env = TestEnv::new();
    fs::write(&env.image, vec![0u8; 1024]).unwrap();
    let gz = env.dir().join("card.img.gz");

    let token = CancelToken::disconnected();
    token.cancel();
    let mut live = LiveState::default();
    let err = compress::compress(&env.image, &gz, false, &token, &mut live);

    assert!(err.is_err());
    assert!(!gz.exists());
    assert!(!compress::tmp_path(&gz).exists());
}

// =============================================================================
// Image growth
// =============================================================================

#[test]
fn test_resize_increment_is_one_gib() {
    let env = TestEnv::new();
    image::create(&env.image, 16, image::FIXED_BLOCK_SIZE).unwrap();

    let new_len = image::grow(&env.image).unwrap();
    assert_eq!(new_len, (16 + 1024) * 1024 * 1024);
}

#[test]
fn test_grow_keeps_file_sparse() {
    use std::os::unix::fs::MetadataExt;

    let env = TestEnv::new();
    image::create(&env.image, 16, image::FIXED_BLOCK_SIZE).unwrap();
    image::grow(&env.image).unwrap();

    let meta = fs::metadata(&env.image).unwrap();
    assert!(meta.blocks() * 512 < 1024 * 1024);
}

// =============================================================================
// Loop device cycles (root only)
// =============================================================================

#[test]
#[ignore] // Requires root and a loop-capable kernel.
fn test_attach_resolve_detach_cycle() {
    assert!(is_root(), "run with sudo: cargo test -- --ignored");

    let env = TestEnv::new();
    image::create(&env.image, 16, image::FIXED_BLOCK_SIZE).unwrap();

    // Fresh image resolves to a free slot.
    let slot = match loopdev::resolve(&env.image, loopdev::AttachPolicy::RequireFree).unwrap() {
        loopdev::Resolved::Free(slot) => slot,
        other => panic!("expected a free slot, got {other:?}"),
    };

    let binding = loopdev::attach(&slot, &env.image).unwrap();
    assert_eq!(
        loopdev::find_binding(&env.image).unwrap().as_ref(),
        Some(&binding)
    );

    // While attached, a second start/mount-style resolution must fail.
    let err = loopdev::resolve(&env.image, loopdev::AttachPolicy::RequireFree).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BackupError>(),
        Some(BackupError::AlreadyAttached { .. })
    ));

    loopdev::detach(&binding.device).unwrap();
    assert_eq!(loopdev::find_binding(&env.image).unwrap(), None);

    // And once detached, umount-style resolution reports no binding.
    let err = loopdev::resolve(&env.image, loopdev::AttachPolicy::RequireBound).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BackupError>(),
        Some(BackupError::NoBinding(_))
    ));
}

#[test]
#[ignore] // Requires root, parted, and mkfs.ext4.
fn test_mount_cycle_leaves_no_residual_directory() {
    use sdmirror::mount;
    use sdmirror::process::Cmd;

    assert!(is_root(), "run with sudo: cargo test -- --ignored");

    let env = TestEnv::new();
    image::create(&env.image, 64, image::FIXED_BLOCK_SIZE).unwrap();

    let binding = mount::ensure_attached(&env.image).unwrap();
    Cmd::new("parted")
        .args(["-s"])
        .arg(&binding.device)
        .args(["mklabel", "msdos"])
        .run()
        .unwrap();
    Cmd::new("parted")
        .args(["-s"])
        .arg(&binding.device)
        .args(["mkpart", "primary", "ext4", "4MiB", "100%"])
        .run()
        .unwrap();
    loopdev::rescan(&binding.device).unwrap();
    Cmd::new("mkfs.ext4")
        .arg("-q")
        .arg_path(&binding.partition(1))
        .run()
        .unwrap();

    let mnt = mount::default_mount_dir(&env.image);
    mount::validate_mount_dir(&mnt, false).unwrap();
    mount::mount(&binding, &mnt, false).unwrap();
    assert!(loopdev::is_mount_point(&mnt));

    mount::unmount(&binding, &mnt, false).unwrap();
    assert!(!mnt.exists(), "default mount dir must be removed");
    assert_eq!(loopdev::find_binding(&env.image).unwrap(), None);
}
