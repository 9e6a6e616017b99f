//! Mount/unmount lifecycle of an image's primary partition.
//!
//! Default-generated mount directories are created immediately before the
//! mount and removed immediately after the unmount; a user-supplied
//! directory must pre-exist and is never created or removed here.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::BackupError;
use crate::interrupt::Session;
use crate::loopdev::{self, Binding};
use crate::process::Cmd;

/// Default mount directory for an image: a `.mnt` sibling of the file.
pub fn default_mount_dir(image: &Path) -> PathBuf {
    let mut name = image.as_os_str().to_os_string();
    name.push(".mnt");
    PathBuf::from(name)
}

/// Eager dispatcher check, before anything mutates: a default-generated
/// directory must not already exist, and a user-supplied one must.
pub fn validate_mount_dir(dir: &Path, user_supplied: bool) -> Result<(), BackupError> {
    if user_supplied {
        if !dir.is_dir() {
            return Err(BackupError::Validation(format!(
                "mount directory {} does not exist",
                dir.display()
            )));
        }
    } else if dir.exists() {
        return Err(BackupError::Validation(format!(
            "default mount directory {} already exists; remove it or pass a mount directory",
            dir.display()
        )));
    }
    Ok(())
}

/// Attach the image if no binding holds it yet, and expose its partitions.
pub fn ensure_attached(image: &Path) -> Result<Binding> {
    match loopdev::find_binding(image)? {
        Some(binding) => Ok(binding),
        None => {
            let slot = loopdev::next_free_slot()?;
            let binding = loopdev::attach(&slot, image)?;
            loopdev::rescan(&binding.device)?;
            Ok(binding)
        }
    }
}

/// Create the mount directory when it is default-generated.
pub fn create_mount_dir(dir: &Path, user_supplied: bool) -> Result<()> {
    if user_supplied {
        return Ok(());
    }
    fs::create_dir(dir)
        .with_context(|| format!("Failed to create mount directory {}", dir.display()))
}

/// Remove the mount directory when it is default-generated.
pub fn remove_mount_dir(dir: &Path, user_supplied: bool) {
    if !user_supplied {
        let _ = fs::remove_dir(dir);
    }
}

/// Mount the binding's primary partition at `dir`.
pub fn mount(binding: &Binding, dir: &Path, user_supplied: bool) -> Result<()> {
    create_mount_dir(dir, user_supplied)?;
    let part = binding.partition(1);
    Cmd::new("mount")
        .arg_path(&part)
        .arg_path(dir)
        .error_msg(format!("Failed to mount {}", part.display()))
        .run()?;
    Ok(())
}

/// Flush, unmount, drop the default directory, detach.
pub fn unmount(binding: &Binding, dir: &Path, user_supplied: bool) -> Result<()> {
    flush();
    Cmd::new("umount")
        .arg_path(dir)
        .error_msg(format!("Failed to unmount {}", dir.display()))
        .run()?;
    remove_mount_dir(dir, user_supplied);
    loopdev::detach(&binding.device)?;
    Ok(())
}

/// Double sync barrier to minimize on-disk inconsistency before unmounting.
fn flush() {
    let _ = Cmd::new("sync").allow_fail().run();
    let _ = Cmd::new("sync").allow_fail().run();
}

/// Best-effort release for the failure path. Every step is attempted even
/// if an earlier one fails.
pub fn emergency_release(session: &Session) {
    if session.mounted {
        flush();
        let _ = Cmd::new("umount")
            .arg_path(&session.mount_dir)
            .allow_fail()
            .run();
        remove_mount_dir(&session.mount_dir, session.user_supplied_mount);
    }
    let _ = Cmd::new("partx")
        .arg("-d")
        .arg(&session.device)
        .allow_fail()
        .run();
    let _ = Cmd::new("losetup")
        .arg("-d")
        .arg(&session.device)
        .allow_fail()
        .run();
}
