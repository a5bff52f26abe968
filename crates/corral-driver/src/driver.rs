//! The sandbox driver capability.
//!
//! Everything the container core needs from the host isolation subsystem
//! goes through [`SandboxDriver`]. Implementations own the native details;
//! the core only sees handles, tokens and pids.

use crate::error::Result;
use crate::path::PathStyle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};

/// Readable end of a process pipe.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writable end of a process pipe.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Resource limits carried through to the driver untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory ceiling in bytes.
    pub memory_bytes: Option<u64>,
    /// Relative CPU weight.
    pub cpu_shares: Option<u64>,
    /// Disk quota in bytes.
    pub disk_bytes: Option<u64>,
    /// Maximum number of processes.
    pub max_processes: Option<u64>,
}

impl ResourceLimits {
    /// True when no limit is set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// What a sandbox is allocated with, besides its image.
#[derive(Debug, Clone, Default)]
pub struct SandboxSpec {
    /// Orchestrator-facing handle of the owning container.
    pub handle: String,
    /// Container-level environment, `KEY=value` entries.
    pub env: Vec<String>,
    /// Opaque orchestrator metadata.
    pub properties: HashMap<String, String>,
    /// Resource limits to apply.
    pub limits: ResourceLimits,
}

/// A live sandbox as returned by [`SandboxDriver::allocate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    id: String,
    root: PathBuf,
    path_style: PathStyle,
}

impl SandboxHandle {
    /// Create a handle. Only drivers should need this.
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>, path_style: PathStyle) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
            path_style,
        }
    }

    /// Driver-assigned sandbox identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Host-visible path of the sandbox filesystem root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path convention used inside the sandbox.
    pub fn path_style(&self) -> PathStyle {
        self.path_style
    }
}

impl fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// A process ready to be bound into a sandbox.
#[derive(Debug, Clone, Default)]
pub struct BoundProcess {
    /// Executable, sandbox convention.
    pub program: String,
    /// Arguments, not including the program.
    pub args: Vec<String>,
    /// Complete environment, already merged.
    pub env: Vec<String>,
    /// Working directory, sandbox convention. `None` means the sandbox root.
    pub working_dir: Option<String>,
    /// Address assigned to the owning container.
    pub network_ip: Option<IpAddr>,
}

/// Opaque token for a bound, not yet started process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessToken(pub u64);

/// Which stdio pipes the caller wants opened.
///
/// Anything not requested is connected to the null device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StdioRequest {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
}

/// A process that has been started.
pub struct StartedProcess {
    /// Host pid of the process.
    pub pid: u32,
    /// Present when stdin was requested.
    pub stdin: Option<BoxedWriter>,
    /// Present when stdout was requested.
    pub stdout: Option<BoxedReader>,
    /// Present when stderr was requested.
    pub stderr: Option<BoxedReader>,
}

impl fmt::Debug for StartedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartedProcess")
            .field("pid", &self.pid)
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// How to ask a process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalMode {
    /// Graceful termination request.
    Terminate,
    /// Immediate forceful termination.
    Kill,
}

impl fmt::Display for SignalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminate => write!(f, "terminate"),
            Self::Kill => write!(f, "kill"),
        }
    }
}

/// Host isolation capability.
///
/// Implementations must be safe to call concurrently for different
/// sandboxes and processes.
#[async_trait]
pub trait SandboxDriver: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Resolve `image` to a filesystem root and allocate a sandbox on it.
    async fn allocate(&self, image: &str, spec: &SandboxSpec) -> Result<SandboxHandle>;

    /// Assign a network endpoint to the sandbox and return its address.
    async fn assign_network(&self, sandbox: &SandboxHandle) -> Result<IpAddr>;

    /// Tear the sandbox down. Unknown sandboxes are a no-op.
    async fn destroy(&self, sandbox: &SandboxHandle) -> Result<()>;

    /// Bind a process description into the sandbox without starting it.
    async fn bind_process(
        &self,
        sandbox: &SandboxHandle,
        process: BoundProcess,
    ) -> Result<ProcessToken>;

    /// Start a bound process with the requested pipes.
    async fn start_process(&self, token: ProcessToken, stdio: StdioRequest)
        -> Result<StartedProcess>;

    /// Deliver a signal. Signalling an already exited process succeeds.
    async fn signal(&self, pid: u32, mode: SignalMode) -> Result<()>;

    /// Wait for the process to exit and return its exit code.
    ///
    /// Called at most once per pid.
    async fn wait_process(&self, pid: u32) -> Result<i32>;
}
