//! Container type - an allocated sandbox with network identity and processes.

use crate::config::RuntimeConfig;
use crate::env::{merge_env, validate_env};
use crate::error::{CoreError, Result, TransferError};
use crate::process::{self, ProcessHandle, ProcessId, ProcessIo, ProcessSpec};
use crate::transfer::{self, TarStream};
use chrono::{DateTime, Utc};
use corral_driver::path::translate;
use corral_driver::{BoundProcess, ResourceLimits, SandboxDriver, SandboxHandle, SandboxSpec, SignalMode};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::AsyncRead;

/// Unique identifier for a container, chosen by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ContainerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What a container is created from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Human-assigned handle, unique within a registry.
    pub handle: String,
    /// Image reference resolved by the driver.
    pub rootfs: String,
    /// `KEY=value` entries every process inherits.
    pub env: Vec<String>,
    /// Opaque key/value metadata.
    pub properties: HashMap<String, String>,
    /// Passed through to the driver.
    pub limits: ResourceLimits,
}

impl ContainerSpec {
    /// Spec with a handle and image reference.
    pub fn new(handle: impl Into<String>, rootfs: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            rootfs: rootfs.into(),
            ..Default::default()
        }
    }

    /// Add an environment entry.
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push(format!("{key}={value}"));
        self
    }

    /// Add a property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set resource limits.
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Sandbox allocated, no process running.
    Created,
    /// At least one process is running.
    Running,
    /// Stop has begun but the sandbox is not yet gone.
    Stopped,
    /// Sandbox destroyed.
    Destroyed,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Destroyed => write!(f, "Destroyed"),
        }
    }
}

/// Point-in-time snapshot returned by [`Container::info`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: ContainerId,
    pub handle: String,
    pub state: ContainerState,
    pub network_ip: IpAddr,
    pub host_ip: IpAddr,
    pub process_ids: Vec<ProcessId>,
    pub properties: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Active,
    Stopping,
    Destroyed,
}

#[derive(Default)]
struct ProcessTable {
    handles: HashMap<ProcessId, ProcessHandle>,
    claimed: HashSet<ProcessId>,
}

/// Destroys an allocated sandbox unless disarmed.
///
/// Covers a create future that is dropped between allocation and success.
struct SandboxGuard {
    driver: Arc<dyn SandboxDriver>,
    sandbox: Option<SandboxHandle>,
    container_id: ContainerId,
}

impl SandboxGuard {
    fn new(driver: Arc<dyn SandboxDriver>, sandbox: SandboxHandle, container_id: ContainerId) -> Self {
        Self {
            driver,
            sandbox: Some(sandbox),
            container_id,
        }
    }

    fn disarm(mut self) {
        self.sandbox = None;
    }

    /// Destroy now and wait for it.
    async fn cleanup(mut self) {
        if let Some(sandbox) = self.sandbox.take() {
            if let Err(e) = self.driver.destroy(&sandbox).await {
                tracing::error!(
                    container_id = %self.container_id,
                    sandbox = %sandbox,
                    error = %e,
                    "Failed to clean up sandbox after failed create"
                );
            }
        }
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        let Some(sandbox) = self.sandbox.take() else {
            return;
        };
        let driver = Arc::clone(&self.driver);
        let container_id = self.container_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = driver.destroy(&sandbox).await {
                        tracing::error!(
                            container_id = %container_id,
                            error = %e,
                            "Failed to clean up abandoned sandbox"
                        );
                    }
                });
            }
            Err(_) => tracing::warn!(
                container_id = %container_id,
                sandbox = %sandbox,
                "No runtime to clean up abandoned sandbox"
            ),
        }
    }
}

/// An isolated execution environment.
///
/// A container owns one driver sandbox, the network address assigned to it
/// and every process started in it. Processes are kept until the container
/// is destroyed so late `wait` calls still see their result.
///
/// Run and stream operations hold the sandbox slot shared; stop holds it
/// exclusively, so teardown waits for in-flight starts and transfers.
pub struct Container {
    id: ContainerId,
    spec: ContainerSpec,
    network_ip: IpAddr,
    config: RuntimeConfig,
    driver: Arc<dyn SandboxDriver>,
    sandbox: tokio::sync::RwLock<Option<SandboxHandle>>,
    lifecycle: RwLock<Lifecycle>,
    processes: Mutex<ProcessTable>,
    created_at: DateTime<Utc>,
}

impl Container {
    /// Allocate a sandbox and assign its network endpoint.
    ///
    /// Any failure after allocation destroys the sandbox before returning.
    pub async fn create(
        id: impl Into<ContainerId>,
        spec: ContainerSpec,
        config: RuntimeConfig,
        driver: Arc<dyn SandboxDriver>,
    ) -> Result<Self> {
        let id = id.into();
        Self::validate(&id, &spec)?;

        let start = std::time::Instant::now();
        tracing::info!(
            container_id = %id,
            handle = %spec.handle,
            rootfs = %spec.rootfs,
            driver = driver.name(),
            "Creating container"
        );

        let sandbox_spec = SandboxSpec {
            handle: spec.handle.clone(),
            env: spec.env.clone(),
            properties: spec.properties.clone(),
            limits: spec.limits.clone(),
        };
        let sandbox = driver
            .allocate(&spec.rootfs, &sandbox_spec)
            .await
            .map_err(|source| {
                tracing::error!(container_id = %id, error = %source, "Sandbox allocation failed");
                CoreError::Allocation {
                    container_id: id.clone(),
                    operation: "allocate",
                    source,
                }
            })?;
        tracing::debug!(container_id = %id, sandbox = %sandbox, "Sandbox allocated");

        let guard = SandboxGuard::new(Arc::clone(&driver), sandbox.clone(), id.clone());

        let network_ip = match driver.assign_network(&sandbox).await {
            Ok(ip) => ip,
            Err(source) => {
                tracing::error!(container_id = %id, error = %source, "Network assignment failed");
                guard.cleanup().await;
                return Err(CoreError::Allocation {
                    container_id: id,
                    operation: "assign_network",
                    source,
                });
            }
        };

        guard.disarm();
        tracing::info!(
            container_id = %id,
            network_ip = %network_ip,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Container created"
        );

        Ok(Self {
            id,
            spec,
            network_ip,
            config,
            driver,
            sandbox: tokio::sync::RwLock::new(Some(sandbox)),
            lifecycle: RwLock::new(Lifecycle::Active),
            processes: Mutex::new(ProcessTable::default()),
            created_at: Utc::now(),
        })
    }

    fn validate(id: &ContainerId, spec: &ContainerSpec) -> Result<()> {
        if id.is_empty() {
            return Err(CoreError::Validation("container id must not be empty".into()));
        }
        if spec.handle.is_empty() {
            return Err(CoreError::Validation("container handle must not be empty".into()));
        }
        if spec.rootfs.trim().is_empty() {
            return Err(CoreError::Validation("rootfs reference must not be empty".into()));
        }
        validate_env(&spec.env)
    }

    /// Get the container ID.
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Get the handle.
    pub fn handle(&self) -> &str {
        &self.spec.handle
    }

    /// Get the spec the container was created from.
    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    /// Get the assigned network address.
    pub fn network_ip(&self) -> IpAddr {
        self.network_ip
    }

    /// Get the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContainerState {
        let lifecycle = self
            .lifecycle
            .read()
            .map(|l| *l)
            .unwrap_or(Lifecycle::Stopping);
        match lifecycle {
            Lifecycle::Destroyed => ContainerState::Destroyed,
            Lifecycle::Stopping => ContainerState::Stopped,
            Lifecycle::Active if self.running_processes().is_empty() => ContainerState::Created,
            Lifecycle::Active => ContainerState::Running,
        }
    }

    fn set_lifecycle(&self, next: Lifecycle) {
        if let Ok(mut lifecycle) = self.lifecycle.write() {
            *lifecycle = next;
        }
    }

    fn is_active(&self) -> bool {
        matches!(self.lifecycle.read().map(|l| *l), Ok(Lifecycle::Active))
    }

    fn invalid_state(&self, expected: &str) -> CoreError {
        CoreError::InvalidState {
            expected: expected.into(),
            actual: self.state().to_string(),
        }
    }

    fn table(&self) -> Result<std::sync::MutexGuard<'_, ProcessTable>> {
        self.processes
            .lock()
            .map_err(|_| CoreError::Validation("process table lock poisoned".into()))
    }

    fn running_processes(&self) -> Vec<ProcessHandle> {
        self.processes
            .lock()
            .map(|table| {
                table
                    .handles
                    .values()
                    .filter(|p| p.is_running())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Look up a process started in this container.
    pub fn process(&self, id: &ProcessId) -> Option<ProcessHandle> {
        self.processes
            .lock()
            .ok()
            .and_then(|table| table.handles.get(id).cloned())
    }

    /// Start a process. Returns as soon as it is running.
    ///
    /// Container environment entries are merged under the process entries.
    pub async fn run(&self, spec: ProcessSpec, io: ProcessIo) -> Result<ProcessHandle> {
        if spec.path.trim().is_empty() {
            return Err(CoreError::Validation("process path must not be empty".into()));
        }
        validate_env(&spec.env)?;

        let slot = self.sandbox.read().await;
        let sandbox = match slot.as_ref() {
            Some(sandbox) if self.is_active() => sandbox,
            _ => return Err(self.invalid_state("Created or Running")),
        };

        let process_id = spec.id.clone().unwrap_or_default();
        {
            let mut table = self.table()?;
            if table.handles.contains_key(&process_id) || !table.claimed.insert(process_id.clone()) {
                return Err(CoreError::Validation(format!(
                    "process id {process_id} already exists in container {}",
                    self.id
                )));
            }
        }

        let style = sandbox.path_style();
        let bound = BoundProcess {
            program: translate(&spec.path, style),
            args: spec.args,
            env: merge_env(&self.spec.env, &spec.env),
            working_dir: spec.dir.as_deref().map(|dir| translate(dir, style)),
            network_ip: Some(self.network_ip),
        };

        let spawned = process::spawn(
            Arc::clone(&self.driver),
            sandbox,
            &self.id,
            process_id.clone(),
            bound,
            io,
        )
        .await;

        let mut table = self.table()?;
        table.claimed.remove(&process_id);
        let handle = spawned?;
        table.handles.insert(process_id, handle.clone());
        Ok(handle)
    }

    /// Unpack a tar stream under `target` in the sandbox.
    ///
    /// The input is read to the end whether or not it succeeds.
    pub async fn stream_in<R>(&self, target: &str, mut reader: R) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let slot = self.sandbox.read().await;
        let Some(sandbox) = slot.as_ref() else {
            let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
            return Err(self.transfer_error(TransferError::NoSandbox));
        };

        let count = transfer::stream_in(sandbox.root(), target, reader)
            .await
            .map_err(|source| {
                tracing::warn!(container_id = %self.id, target_path = %target, error = %source, "Stream in failed");
                self.transfer_error(source)
            })?;
        tracing::info!(container_id = %self.id, target_path = %target, entries = count, "Streamed in");
        Ok(())
    }

    /// Archive `source` from the sandbox as a lazy tar stream.
    ///
    /// The stream reads the sandbox as it goes; a stop that races it ends
    /// the stream with a read error rather than a clean end of stream.
    pub async fn stream_out(&self, source: &str) -> Result<TarStream> {
        let slot = self.sandbox.read().await;
        let sandbox = slot
            .as_ref()
            .ok_or_else(|| self.transfer_error(TransferError::NoSandbox))?;

        let stream = transfer::stream_out(sandbox.root(), source)
            .await
            .map_err(|e| self.transfer_error(e))?;
        tracing::debug!(container_id = %self.id, source_path = %source, "Streaming out");
        Ok(stream)
    }

    fn transfer_error(&self, source: TransferError) -> CoreError {
        CoreError::Transfer {
            container_id: self.id.clone(),
            source,
        }
    }

    /// Terminate every process and destroy the sandbox.
    ///
    /// With `kill` false, processes get the grace period before being
    /// killed. Calling stop again, or on a destroyed container, succeeds.
    pub async fn stop(&self, kill: bool) -> Result<()> {
        let mut slot = self.sandbox.write().await;
        let Some(sandbox) = slot.clone() else {
            tracing::debug!(container_id = %self.id, "Stop on destroyed container");
            return Ok(());
        };

        let start = std::time::Instant::now();
        tracing::info!(container_id = %self.id, kill, "Stopping container");
        self.set_lifecycle(Lifecycle::Stopping);

        let running = self.running_processes();
        let unterminated = self.terminate(&running, kill).await;

        if let Err(source) = self.driver.destroy(&sandbox).await {
            tracing::error!(container_id = %self.id, error = %source, "Sandbox destroy failed");
            return Err(CoreError::Driver {
                container_id: self.id.clone(),
                operation: "destroy",
                source,
            });
        }
        *slot = None;
        self.set_lifecycle(Lifecycle::Destroyed);

        tracing::info!(
            container_id = %self.id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Container destroyed"
        );

        if unterminated > 0 {
            return Err(CoreError::Teardown {
                container_id: self.id.clone(),
                message: format!(
                    "{unterminated} process(es) did not confirm termination within {:?}",
                    self.config.kill_timeout
                ),
            });
        }
        Ok(())
    }

    /// Signal processes and wait for them. Returns how many never finished.
    async fn terminate(&self, processes: &[ProcessHandle], kill: bool) -> usize {
        if processes.is_empty() {
            return 0;
        }

        if !kill {
            self.signal_all(processes, SignalMode::Terminate).await;
            if wait_all(processes, self.config.stop_grace_period).await {
                return 0;
            }
            tracing::warn!(
                container_id = %self.id,
                grace_ms = self.config.stop_grace_period.as_millis() as u64,
                "Grace period elapsed, killing processes"
            );
        }

        self.signal_all(processes, SignalMode::Kill).await;
        if wait_all(processes, self.config.kill_timeout).await {
            return 0;
        }

        let remaining = processes.iter().filter(|p| p.is_running()).count();
        tracing::error!(container_id = %self.id, remaining, "Processes survived kill");
        remaining
    }

    async fn signal_all(&self, processes: &[ProcessHandle], mode: SignalMode) {
        for process in processes.iter().filter(|p| p.is_running()) {
            if let Err(e) = process.signal(mode).await {
                tracing::warn!(
                    container_id = %self.id,
                    process_id = %process.id(),
                    %mode,
                    error = %e,
                    "Failed to signal process"
                );
            }
        }
    }

    /// Read-only snapshot. Never waits on in-flight operations.
    pub fn info(&self) -> ContainerInfo {
        let mut process_ids: Vec<ProcessId> = self
            .processes
            .lock()
            .map(|table| table.handles.keys().cloned().collect())
            .unwrap_or_default();
        process_ids.sort();

        ContainerInfo {
            id: self.id.clone(),
            handle: self.spec.handle.clone(),
            state: self.state(),
            network_ip: self.network_ip,
            host_ip: self.config.host_ip,
            process_ids,
            properties: self.spec.properties.clone(),
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("handle", &self.spec.handle)
            .field("state", &self.state())
            .field("network_ip", &self.network_ip)
            .finish()
    }
}

/// Wait for every process to reach a terminal status within `timeout`.
async fn wait_all(processes: &[ProcessHandle], timeout: Duration) -> bool {
    let waits = processes.iter().map(|p| p.wait());
    tokio::time::timeout(timeout, futures::future::join_all(waits))
        .await
        .is_ok()
}
