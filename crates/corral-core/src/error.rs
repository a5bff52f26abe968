//! Error types for corral-core.

use crate::container::ContainerId;
use crate::process::ProcessId;
use corral_driver::DriverError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for corral-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur during container operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad or duplicate identifier, malformed spec
    #[error("validation error: {0}")]
    Validation(String),

    /// Sandbox allocation or network assignment failed
    #[error("allocation failed for container {container_id} ({operation}): {source}")]
    Allocation {
        container_id: ContainerId,
        operation: &'static str,
        #[source]
        source: DriverError,
    },

    /// Process could not be started
    #[error("failed to spawn process {process_id} in container {container_id}: {source}")]
    Spawn {
        container_id: ContainerId,
        process_id: ProcessId,
        #[source]
        source: DriverError,
    },

    /// Process started but failed while running
    #[error("process {process_id} failed: {message}")]
    Runtime {
        process_id: ProcessId,
        message: String,
    },

    /// Archive transfer into or out of a sandbox failed
    #[error("transfer failed for container {container_id}: {source}")]
    Transfer {
        container_id: ContainerId,
        #[source]
        source: TransferError,
    },

    /// Processes did not confirm termination during stop
    #[error("teardown of container {container_id} incomplete: {message}")]
    Teardown {
        container_id: ContainerId,
        message: String,
    },

    /// Any other driver failure, with the operation that hit it
    #[error("driver error during {operation} for container {container_id}: {source}")]
    Driver {
        container_id: ContainerId,
        operation: &'static str,
        #[source]
        source: DriverError,
    },

    /// Container not found
    #[error("container not found: {0}")]
    NotFound(String),

    /// Invalid container state for operation
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors specific to tar stream transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The container has no allocated sandbox
    #[error("sandbox is not allocated")]
    NoSandbox,

    /// An archive entry or target path resolves outside the target root
    #[error("path escapes the sandbox root: {0}")]
    PathEscape(String),

    /// The byte stream is not a valid tar archive
    #[error("malformed archive: {0}")]
    Malformed(#[source] std::io::Error),

    /// Writing an entry inside the sandbox failed
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading from the sandbox failed
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The source path does not exist in the sandbox
    #[error("source path not found: {0}")]
    NotFound(String),

    /// Entry types the transfer does not materialize
    #[error("unsupported archive entry {path} ({kind})")]
    Unsupported { path: String, kind: String },

    /// The background transfer task died
    #[error("transfer task failed: {0}")]
    Task(String),
}
