//! Centralized command execution with consistent error handling.
//!
//! Every external tool (losetup, parted, rsync, ...) is invoked through
//! `Cmd`, which captures exit status and output so callers never rely on
//! ambient success inspection. Tools that read an answer script (fdisk)
//! get it over piped stdin; long-running transfers (rsync, pv) can run
//! with inherited stdio so the operator sees progress.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    stdin_data: Option<String>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Custom error message prefix.
    error_prefix: Option<String>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            stdin_data: None,
            allow_fail: false,
            error_prefix: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Feed the given text to the command over piped stdin.
    ///
    /// Used to drive interactive-table-edit tools (fdisk) non-interactively.
    pub fn stdin(mut self, data: impl AsRef<str>) -> Self {
        self.stdin_data = Some(data.as_ref().to_string());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// Run the command and capture output.
    pub fn run(self) -> Result<CommandResult> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        let output = if let Some(ref data) = self.stdin_data {
            cmd.stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            let mut child = cmd.spawn().with_context(|| {
                format!("Failed to execute '{}'. Is it installed?", self.program)
            })?;
            // Scope the handle so the pipe closes before we wait.
            {
                let mut stdin = child
                    .stdin
                    .take()
                    .with_context(|| format!("Failed to open stdin of '{}'", self.program))?;
                stdin
                    .write_all(data.as_bytes())
                    .with_context(|| format!("Failed to write to stdin of '{}'", self.program))?;
            }
            child
                .wait_with_output()
                .with_context(|| format!("Failed to wait for '{}'", self.program))?
        } else {
            cmd.output().with_context(|| {
                format!("Failed to execute '{}'. Is it installed?", self.program)
            })?
        };

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !self.allow_fail && !result.success() {
            let prefix = self
                .error_prefix
                .unwrap_or_else(|| format!("'{}' failed", self.program));

            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            } else {
                bail!("{} (exit code {}):\n{}", prefix, result.code(), stderr);
            }
        }

        Ok(result)
    }

    /// Run the command with inherited stdio (streaming).
    ///
    /// Output goes directly to the terminal. Use for long-running commands
    /// where the operator should see progress (rsync transfers).
    pub fn run_streaming(self) -> Result<ExitStatus> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::inherit());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        let status = cmd.status().with_context(|| {
            format!("Failed to execute '{}'. Is it installed?", self.program)
        })?;

        if !self.allow_fail && !status.success() {
            let prefix = self
                .error_prefix
                .unwrap_or_else(|| format!("'{}' failed", self.program));
            bail!("{} (exit code {})", prefix, status.code().unwrap_or(-1));
        }

        Ok(status)
    }
}

/// Check if a program exists in PATH.
///
/// Returns the full path if found, None otherwise.
pub fn which(program: &str) -> Option<String> {
    ::which::which(program)
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}

/// Check if a program exists in PATH (bool version).
pub fn exists(program: &str) -> bool {
    which(program).is_some()
}

// =============================================================================
// Tests
// =============================================================================
