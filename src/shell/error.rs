//! Errors raised by the remote shell.

use std::net::IpAddr;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Failures while reaching or driving the lab instance over SSH.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ShellError {
    /// A required shell setting is empty or out of range.
    #[error("invalid shell configuration: {field}")]
    InvalidConfig {
        /// Offending setting.
        field: String,
    },
    /// A local program could not be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error text.
        message: String,
    },
    /// Every connection attempt failed.
    #[error("could not reach {address} after {attempts} attempts: {last_error}")]
    ConnectExhausted {
        /// Instance address.
        address: IpAddr,
        /// Attempts made.
        attempts: u32,
        /// Rendering of the last failure.
        last_error: String,
    },
    /// The run was cancelled before the operation completed.
    #[error("cancelled while {operation}")]
    Cancelled {
        /// Operation that was interrupted.
        operation: String,
    },
    /// A local file to upload does not exist.
    #[error("local file missing: {path}")]
    MissingLocalFile {
        /// Path that was expected to exist.
        path: Utf8PathBuf,
    },
    /// A local file could not be inspected.
    #[error("failed to inspect {path}: {message}")]
    LocalIo {
        /// Path being inspected.
        path: Utf8PathBuf,
        /// Operating system error text.
        message: String,
    },
    /// `ssh` or `scp` exited unsuccessfully.
    #[error("{program} exited with status {status}: {stderr}")]
    CommandFailed {
        /// Program that failed.
        program: String,
        /// Exit status text.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
}
