//! Error types for corral-driver.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for corral-driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors that can occur inside a sandbox driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The image reference did not resolve to a filesystem root
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// The image reference resolved to something that is not a usable root
    #[error("invalid image {reference}: {reason}")]
    InvalidImage { reference: String, reason: String },

    /// The sandbox handle is not known to the driver
    #[error("sandbox not found: {0}")]
    SandboxNotFound(String),

    /// No addresses left in the network pool
    #[error("network address pool exhausted ({0})")]
    NetworkExhausted(String),

    /// The process could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The bound process token is unknown or was already started
    #[error("unknown process token: {0}")]
    UnknownToken(u64),

    /// Delivering a signal failed
    #[error("failed to signal pid {pid}: {message}")]
    Signal { pid: u32, message: String },

    /// Waiting on a process failed
    #[error("failed to wait for pid {pid}: {message}")]
    Wait { pid: u32, message: String },

    /// Path resolved outside of the sandbox root
    #[error("path escapes sandbox root: {0}")]
    PathEscape(PathBuf),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
