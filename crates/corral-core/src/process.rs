//! Process runner.
//!
//! A process is bound and started through the driver, then three kinds of
//! background task take over: one pump per wired stream and a monitor that
//! waits for exit. The monitor publishes the terminal status on a watch
//! channel exactly once, which is what every [`ProcessHandle::wait`] call
//! observes.

use crate::container::ContainerId;
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use corral_driver::{
    BoundProcess, BoxedReader, BoxedWriter, SandboxDriver, SandboxHandle, SignalMode,
    StdioRequest,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Unique identifier of a process within its container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProcessId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What to run inside a container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Caller-chosen identifier. Generated when absent.
    pub id: Option<ProcessId>,
    /// Executable path in the sandbox convention.
    pub path: String,
    /// Arguments, not including the program name.
    pub args: Vec<String>,
    /// `KEY=value` overrides on top of the container environment.
    pub env: Vec<String>,
    /// Working directory in the sandbox convention.
    pub dir: Option<String>,
}

impl ProcessSpec {
    /// Spec for running `path` with no arguments.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Use a specific process identifier.
    pub fn id(mut self, id: impl Into<ProcessId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment override.
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push(format!("{key}={value}"));
        self
    }

    /// Set the working directory.
    pub fn dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = Some(dir.into());
        self
    }
}

/// Caller-side stdio bindings. Absent streams are closed or discarded.
#[derive(Default)]
pub struct ProcessIo {
    /// Source copied into the process stdin.
    pub stdin: Option<BoxedReader>,
    /// Sink receiving process stdout.
    pub stdout: Option<BoxedWriter>,
    /// Sink receiving process stderr.
    pub stderr: Option<BoxedWriter>,
}

impl ProcessIo {
    /// No streams wired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire a stdin source.
    pub fn stdin(mut self, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stdin = Some(Box::new(reader));
        self
    }

    /// Wire a stdout sink.
    pub fn stdout(mut self, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stdout = Some(Box::new(writer));
        self
    }

    /// Wire a stderr sink.
    pub fn stderr(mut self, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stderr = Some(Box::new(writer));
        self
    }
}

impl fmt::Debug for ProcessIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessIo")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// In-memory sink that can be cloned and read back after the process ends.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl OutputBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.bytes
            .lock()
            .map(|bytes| bytes.clone())
            .unwrap_or_default()
    }

    /// Contents decoded as UTF-8, lossily.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.bytes.lock().map(|bytes| bytes.len()).unwrap_or(0)
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AsyncWrite for OutputBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut bytes = self
            .bytes
            .lock()
            .map_err(|_| io::Error::other("output buffer lock poisoned"))?;
        bytes.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Observable status of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Started and not yet finished.
    Running,
    /// Exited with a code.
    Exited(i32),
    /// Could not be waited on, or its I/O broke.
    Failed(String),
}

impl ProcessStatus {
    /// Whether the status is final.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Exited(code) => write!(f, "exited({code})"),
            Self::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}

struct ProcessInner {
    id: ProcessId,
    container_id: ContainerId,
    pid: u32,
    started_at: DateTime<Utc>,
    driver: Arc<dyn SandboxDriver>,
    status: watch::Receiver<ProcessStatus>,
}

/// Handle to a running or finished process.
///
/// Cheap to clone; all clones observe the same status.
#[derive(Clone)]
pub struct ProcessHandle {
    inner: Arc<ProcessInner>,
}

impl ProcessHandle {
    /// Process identifier within the container.
    pub fn id(&self) -> &ProcessId {
        &self.inner.id
    }

    /// Owning container.
    pub fn container_id(&self) -> &ContainerId {
        &self.inner.container_id
    }

    /// Driver-level process id.
    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    /// When the process was started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Current status without blocking.
    pub fn status(&self) -> ProcessStatus {
        self.inner.status.borrow().clone()
    }

    /// Whether the process has not reached a terminal status.
    pub fn is_running(&self) -> bool {
        !self.inner.status.borrow().is_terminal()
    }

    /// Wait for the process to finish and return its exit code.
    ///
    /// May be called any number of times, concurrently or after the fact.
    pub async fn wait(&self) -> Result<i32> {
        let mut status = self.inner.status.clone();
        let terminal = {
            let observed = status
                .wait_for(ProcessStatus::is_terminal)
                .await
                .map_err(|_| CoreError::Runtime {
                    process_id: self.inner.id.clone(),
                    message: "process monitor stopped without a result".into(),
                })?;
            observed.clone()
        };

        match terminal {
            ProcessStatus::Exited(code) => Ok(code),
            ProcessStatus::Failed(message) => Err(CoreError::Runtime {
                process_id: self.inner.id.clone(),
                message,
            }),
            ProcessStatus::Running => Err(CoreError::Runtime {
                process_id: self.inner.id.clone(),
                message: "process status regressed to running".into(),
            }),
        }
    }

    /// Send a signal. Signalling a finished process succeeds.
    pub async fn signal(&self, mode: SignalMode) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        self.inner
            .driver
            .signal(self.inner.pid, mode)
            .await
            .map_err(|source| CoreError::Driver {
                container_id: self.inner.container_id.clone(),
                operation: "signal",
                source,
            })
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.inner.id)
            .field("container_id", &self.inner.container_id)
            .field("pid", &self.inner.pid)
            .field("status", &self.status())
            .finish()
    }
}

/// Bind, start and wire a process. Returns once it is running.
pub(crate) async fn spawn(
    driver: Arc<dyn SandboxDriver>,
    sandbox: &SandboxHandle,
    container_id: &ContainerId,
    process_id: ProcessId,
    process: BoundProcess,
    io: ProcessIo,
) -> Result<ProcessHandle> {
    let spawn_error = |source| CoreError::Spawn {
        container_id: container_id.clone(),
        process_id: process_id.clone(),
        source,
    };

    let program = process.program.clone();
    let token = driver
        .bind_process(sandbox, process)
        .await
        .map_err(spawn_error)?;

    let request = StdioRequest {
        stdin: io.stdin.is_some(),
        stdout: io.stdout.is_some(),
        stderr: io.stderr.is_some(),
    };
    let started = driver
        .start_process(token, request)
        .await
        .map_err(spawn_error)?;
    let pid = started.pid;

    let stdin_task = match (io.stdin, started.stdin) {
        (Some(from), Some(to)) => Some(tokio::spawn(feed_stdin(from, to))),
        _ => None,
    };
    let stdout_task = match (started.stdout, io.stdout) {
        (Some(from), Some(to)) => Some(tokio::spawn(pump(from, to))),
        _ => None,
    };
    let stderr_task = match (started.stderr, io.stderr) {
        (Some(from), Some(to)) => Some(tokio::spawn(pump(from, to))),
        _ => None,
    };

    let (status_tx, status_rx) = watch::channel(ProcessStatus::Running);

    let monitor_driver = Arc::clone(&driver);
    let monitor_container = container_id.clone();
    let monitor_process = process_id.clone();
    tokio::spawn(async move {
        let exit = monitor_driver.wait_process(pid).await;

        // output is complete only once both pipes reach EOF
        let stdout = join_pump(stdout_task).await;
        let stderr = join_pump(stderr_task).await;
        if let Some(task) = stdin_task {
            task.abort();
        }

        let status = match (exit, stdout, stderr) {
            (Err(e), _, _) => ProcessStatus::Failed(e.to_string()),
            (Ok(_), Err(e), _) => ProcessStatus::Failed(format!("stdout pipe broken: {e}")),
            (Ok(_), _, Err(e)) => ProcessStatus::Failed(format!("stderr pipe broken: {e}")),
            (Ok(code), Ok(()), Ok(())) => ProcessStatus::Exited(code),
        };

        match &status {
            ProcessStatus::Failed(message) => tracing::warn!(
                container_id = %monitor_container,
                process_id = %monitor_process,
                pid,
                error = %message,
                "Process failed"
            ),
            _ => tracing::info!(
                container_id = %monitor_container,
                process_id = %monitor_process,
                pid,
                status = %status,
                "Process finished"
            ),
        }
        status_tx.send_replace(status);
    });

    tracing::info!(
        container_id = %container_id,
        process_id = %process_id,
        pid,
        program = %program,
        "Process started"
    );

    Ok(ProcessHandle {
        inner: Arc::new(ProcessInner {
            id: process_id,
            container_id: container_id.clone(),
            pid,
            started_at: Utc::now(),
            driver,
            status: status_rx,
        }),
    })
}

/// Copy process output into a caller sink.
///
/// If the sink fails the pipe is still drained so the process never blocks
/// on a full pipe.
async fn pump(mut from: BoxedReader, mut to: BoxedWriter) -> io::Result<()> {
    let copied = async {
        tokio::io::copy(&mut from, &mut to).await?;
        to.flush().await
    }
    .await;

    if copied.is_err() {
        let _ = tokio::io::copy(&mut from, &mut tokio::io::sink()).await;
    }
    copied
}

/// Copy caller input into process stdin, closing it at EOF.
async fn feed_stdin(mut from: BoxedReader, mut to: BoxedWriter) {
    if let Err(e) = tokio::io::copy(&mut from, &mut to).await {
        // the process closing stdin early is not an error for the process
        tracing::debug!(error = %e, "stdin copy ended early");
    }
    let _ = to.shutdown().await;
}

async fn join_pump(task: Option<JoinHandle<io::Result<()>>>) -> io::Result<()> {
    match task {
        Some(task) => task.await.map_err(io::Error::other)?,
        None => Ok(()),
    }
}
