//! Cooperative cancellation and the failure-path teardown.
//!
//! A Ctrl-C only sets a flag; subprocesses already running are never killed.
//! The orchestrator polls the token after each blocking step returns and
//! routes both cancellation and ordinary errors through one `teardown`
//! call, so recovery behaves the same no matter how a run died.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::BackupError;
use crate::mount;

/// Cancellation token tripped by the interrupt handler.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Install the Ctrl-C handler and return the token it trips.
    pub fn install() -> Result<Self> {
        let flag = Arc::new(AtomicBool::new(false));
        let handler_flag = Arc::clone(&flag);
        ctrlc::set_handler(move || {
            handler_flag.store(true, Ordering::SeqCst);
        })
        .context("Failed to install the interrupt handler")?;
        Ok(Self { flag })
    }

    /// A token not wired to any signal (tests and nested use).
    pub fn disconnected() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation by hand.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fail with `Interrupted` if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(BackupError::Interrupted.into())
        } else {
            Ok(())
        }
    }
}

/// What the orchestrator believes is currently live on the host.
///
/// Updated as lifecycle steps complete; consumed by `teardown` when a run
/// fails or is cancelled.
#[derive(Debug, Default)]
pub struct LiveState {
    /// In-flight compression temporary, if the pipeline is (or was) active.
    pub compression_tmp: Option<PathBuf>,
    /// Attached (and possibly mounted) session, if any.
    pub session: Option<Session>,
}

#[derive(Debug)]
pub struct Session {
    pub device: String,
    pub mount_dir: PathBuf,
    pub user_supplied_mount: bool,
    pub mounted: bool,
}

impl LiveState {
    pub fn attached(&mut self, device: &str, mount_dir: &Path, user_supplied_mount: bool) {
        self.session = Some(Session {
            device: device.to_string(),
            mount_dir: mount_dir.to_path_buf(),
            user_supplied_mount,
            mounted: false,
        });
    }

    pub fn mounted(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.mounted = true;
        }
    }

    /// The session ended cleanly; nothing left to tear down.
    pub fn released(&mut self) {
        self.session = None;
    }
}

/// Clean up whatever a failed or cancelled run left behind.
///
/// A non-empty compression temporary is treated as the active operation and
/// removed (a truncated artifact must never be promoted). Otherwise any
/// live mount/attachment gets the full unmount-and-detach treatment.
pub fn teardown(live: &LiveState, log_path: Option<&Path>) {
    if let Some(tmp) = &live.compression_tmp {
        let non_empty = fs::metadata(tmp).map(|m| m.len() > 0).unwrap_or(false);
        if non_empty {
            println!("Removing partial compressed file {}", tmp.display());
            let _ = fs::remove_file(tmp);
        }
    } else if let Some(session) = &live.session {
        println!("Cleaning up {}...", session.device);
        mount::emergency_release(session);
    }

    if let Some(log) = log_path {
        println!("Transfer log: {}", log.display());
    }
}
