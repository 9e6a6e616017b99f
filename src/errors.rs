//! Error taxonomy for sdmirror.
//!
//! Every fatal condition maps to one of these variants so callers and tests
//! can tell failure classes apart. All of them terminate the process with
//! exit code 1 when they reach `main`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    /// Bad arguments, missing image, pre-existing default mount directory,
    /// or any other precondition caught before mutation begins.
    #[error("{0}")]
    Validation(String),

    /// Not running as root.
    #[error("this command must be run as root (try sudo)")]
    Privilege,

    /// A required external program is absent from PATH.
    #[error("required tool '{tool}' not found in PATH ({purpose})")]
    DependencyMissing { tool: String, purpose: String },

    /// Sparse image allocation produced no file, or an empty one.
    #[error("failed to create image {}", .0.display())]
    CreationFailed(PathBuf),

    /// A bootloader payload is still missing after an attempted fetch.
    #[error("bootloader payload '{0}' missing and could not be fetched")]
    BootloaderAssetMissing(String),

    /// The image is already bound to a loop device.
    #[error("{} is already attached to {}{}", .image.display(), .device, mounted_hint(.mounted_at))]
    AlreadyAttached {
        image: PathBuf,
        device: String,
        mounted_at: Option<String>,
    },

    /// No loop device currently holds the image.
    #[error("no loop device is attached to {}", .0.display())]
    NoBinding(PathBuf),

    /// The operator cancelled the run.
    #[error("interrupted")]
    Interrupted,
}

fn mounted_hint(mounted_at: &Option<String>) -> String {
    match mounted_at {
        Some(dir) => format!(" (mounted at {dir})"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_attached_message_includes_mount() {
        let err = BackupError::AlreadyAttached {
            image: PathBuf::from("/data/card.img"),
            device: "/dev/loop3".to_string(),
            mounted_at: Some("/mnt/card".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("/dev/loop3"));
        assert!(msg.contains("/mnt/card"));
    }

    #[test]
    fn test_already_attached_message_without_mount() {
        let err = BackupError::AlreadyAttached {
            image: PathBuf::from("card.img"),
            device: "/dev/loop0".to_string(),
            mounted_at: None,
        };
        assert!(!err.to_string().contains("mounted at"));
    }
}
