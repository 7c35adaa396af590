//! Error types for the config guard, the exec gate and the management
//! commands.
//!
//! Every failure is terminal for the invocation. Nothing is retried; the
//! binary prints the error on one line and exits with status 1.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by execfda.
#[derive(Debug, Error)]
pub enum ExecfdaError {
    /// The config file exists but could not be read or parsed.
    #[error("cannot read config {}: {reason}", .path.display())]
    ConfigRead { path: PathBuf, reason: String },

    /// The config file mode is not exactly the required mode.
    #[error(
        "insecure config {}: mode {mode:04o}, expected {expected:04o}",
        .path.display()
    )]
    Permission {
        path: PathBuf,
        mode: u32,
        expected: u32,
    },

    /// The config file is not owned by the required user and group.
    #[error(
        "insecure config {}: owned by {uid}:{gid}, expected {expected_uid}:{expected_gid}",
        .path.display()
    )]
    Ownership {
        path: PathBuf,
        uid: u32,
        gid: u32,
        expected_uid: u32,
        expected_gid: u32,
    },

    /// The config path is a symlink, directory or other non-regular file.
    #[error("insecure config {}: not a regular file", .path.display())]
    NotRegularFile { path: PathBuf },

    /// A management command was invoked by someone other than the superuser.
    #[error("you must be root to manage the configuration (invoked as {user})")]
    Authorization { user: String },

    /// The program could not be found on `$PATH`.
    #[error("command not found on PATH: {program}")]
    Resolution {
        program: String,
        #[source]
        source: which::Error,
    },

    /// `execve` returned, which only happens on failure.
    #[error("failed to execute {}", .binary.display())]
    Execution {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `config add` was given a command that normalizes to nothing.
    #[error("refusing to add an empty command")]
    EmptyCommand,

    /// No allowlist entry matches the requested command line.
    #[error("command not allowed: {command}")]
    NotAllowed { command: String },

    /// Persisting or re-securing the config file failed.
    #[error("cannot write config {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ExecfdaError {
    /// True for the errors that mean the config file must not be trusted.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::Permission { .. } | Self::Ownership { .. } | Self::NotRegularFile { .. }
        )
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = ExecfdaError> = std::result::Result<T, E>;
