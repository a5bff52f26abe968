//! Host-directory sandbox driver.
//!
//! Each sandbox is a private copy of an image directory under the state
//! directory. Processes run as host processes in their own process group with
//! their working directory inside the sandbox root. There is no kernel-level
//! isolation; this driver exists for local operation and tests.

use crate::config::LocalDriverConfig;
use crate::driver::{
    BoundProcess, BoxedReader, BoxedWriter, ProcessToken, SandboxDriver, SandboxHandle,
    SandboxSpec, SignalMode, StartedProcess, StdioRequest,
};
use crate::error::{DriverError, Result};
use crate::network::AddressPool;
use crate::path::{self, PathStyle};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::process::{Child, Command};
use uuid::Uuid;

/// PATH given to processes whose environment does not set one.
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Variable carrying the container address, unless the environment sets it.
pub const CONTAINER_IP_VAR: &str = "CONTAINER_IP";

/// Per-sandbox bookkeeping.
#[derive(Debug)]
struct SandboxRecord {
    /// `<state_dir>/<id>`, removed on destroy.
    dir: PathBuf,
    root: PathBuf,
    address: Option<Ipv4Addr>,
    pids: HashSet<u32>,
}

#[derive(Debug)]
struct PendingProcess {
    sandbox_id: String,
    root: PathBuf,
    process: BoundProcess,
}

/// Sandbox driver backed by host directories and host processes.
pub struct LocalDriver {
    config: LocalDriverConfig,
    addresses: AddressPool,
    sandboxes: Mutex<HashMap<String, SandboxRecord>>,
    pending: Mutex<HashMap<u64, PendingProcess>>,
    /// Children not yet waited on, by pid.
    children: Mutex<HashMap<u32, Child>>,
    /// Pids not yet reaped, mapped to their sandbox.
    live: Mutex<HashMap<u32, String>>,
    next_token: AtomicU64,
}

impl LocalDriver {
    /// Create a driver from a validated configuration.
    pub fn new(config: LocalDriverConfig) -> Result<Self> {
        config.validate()?;
        let addresses = AddressPool::new(config.subnet, config.prefix_len)?;
        tracing::info!(
            image_root = %config.image_root.display(),
            state_dir = %config.state_dir.display(),
            subnet = %config.subnet,
            prefix_len = config.prefix_len,
            "Creating local sandbox driver"
        );
        Ok(Self {
            config,
            addresses,
            sandboxes: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            children: Mutex::new(HashMap::new()),
            live: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        })
    }

    /// Get the driver configuration.
    pub fn config(&self) -> &LocalDriverConfig {
        &self.config
    }

    /// Number of sandboxes currently allocated.
    pub fn sandbox_count(&self) -> usize {
        self.sandboxes.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Resolve an image reference to a directory.
    ///
    /// Absolute references are used as-is. Anything else names a directory
    /// under the image root; a `:tag` suffix is ignored.
    fn resolve_image(&self, reference: &str) -> Result<PathBuf> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(DriverError::ImageNotFound(reference.to_string()));
        }

        let candidate = if Path::new(reference).is_absolute() {
            PathBuf::from(reference)
        } else {
            let name = reference.split(':').next().unwrap_or(reference);
            let relative = path::normalize_relative(Path::new(name))
                .filter(|p| !p.as_os_str().is_empty())
                .ok_or_else(|| DriverError::InvalidImage {
                    reference: reference.to_string(),
                    reason: "reference escapes the image root".into(),
                })?;
            self.config.image_root.join(relative)
        };

        match fs::metadata(&candidate) {
            Ok(meta) if meta.is_dir() => Ok(candidate),
            Ok(_) => Err(DriverError::InvalidImage {
                reference: reference.to_string(),
                reason: format!("{} is not a directory", candidate.display()),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(DriverError::ImageNotFound(reference.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> Result<std::sync::MutexGuard<'a, T>> {
        mutex
            .lock()
            .map_err(|_| DriverError::Config("local driver state lock poisoned".into()))
    }

    fn kill_group(pid: u32, signal: Signal) -> Result<()> {
        match killpg(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(DriverError::Signal {
                pid,
                message: e.to_string(),
            }),
        }
    }
}

/// Recursively copy an image tree. Symlinks are recreated, not followed.
fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Pick the executable: a path that exists under the sandbox root wins,
/// otherwise the program is looked up on the host.
fn resolve_program(root: &Path, program: &str) -> PathBuf {
    let translated = path::translate(program, PathStyle::Unix);
    if translated.contains('/') {
        if let Ok(inside) = path::resolve_in_root(root, &translated) {
            if inside.is_file() {
                return inside;
            }
        }
    }
    PathBuf::from(translated)
}

/// Resolve the working directory and check that, with symlinks followed,
/// it is still a directory inside the sandbox root.
fn working_dir(root: &Path, dir: Option<&str>) -> Result<PathBuf> {
    let cwd = match dir {
        Some(dir) => path::resolve_in_root(root, dir)?,
        None => root.to_path_buf(),
    };
    let resolved = cwd.canonicalize().map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("working directory {}: {e}", cwd.display()),
        )
    })?;
    if !resolved.starts_with(root.canonicalize()?) {
        return Err(DriverError::PathEscape(cwd));
    }
    if !resolved.is_dir() {
        return Err(DriverError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("working directory {} is not a directory", cwd.display()),
        )));
    }
    Ok(resolved)
}

fn spawn_error(program: &str, source: io::Error) -> DriverError {
    DriverError::Spawn {
        program: program.to_string(),
        source,
    }
}

#[async_trait]
impl SandboxDriver for LocalDriver {
    fn name(&self) -> &str {
        "local"
    }

    async fn allocate(&self, image: &str, spec: &SandboxSpec) -> Result<SandboxHandle> {
        let image_dir = self.resolve_image(image)?;
        let id = Uuid::new_v4().simple().to_string();
        let dir = self.config.state_dir.join(&id);
        let root = dir.join("rootfs");

        tracing::debug!(
            sandbox_id = %id,
            image = %image_dir.display(),
            handle = %spec.handle,
            "Allocating local sandbox"
        );
        if !spec.limits.is_empty() {
            // recorded only; the local driver has no enforcement mechanism
            tracing::debug!(sandbox_id = %id, limits = ?spec.limits, "Resource limits requested");
        }

        let (src, dst) = (image_dir.clone(), root.clone());
        let copied = tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
            .await
            .map_err(io::Error::other)
            .and_then(|r| r);
        if let Err(e) = copied {
            tracing::error!(sandbox_id = %id, error = %e, "Failed to populate sandbox root");
            let _ = tokio::fs::remove_dir_all(&dir).await;
            return Err(e.into());
        }

        self.lock(&self.sandboxes)?.insert(
            id.clone(),
            SandboxRecord {
                dir,
                root: root.clone(),
                address: None,
                pids: HashSet::new(),
            },
        );

        tracing::info!(sandbox_id = %id, root = %root.display(), "Local sandbox allocated");
        Ok(SandboxHandle::new(id, root, PathStyle::Unix))
    }

    async fn assign_network(&self, sandbox: &SandboxHandle) -> Result<IpAddr> {
        let mut sandboxes = self.lock(&self.sandboxes)?;
        let record = sandboxes
            .get_mut(sandbox.id())
            .ok_or_else(|| DriverError::SandboxNotFound(sandbox.id().to_string()))?;
        if let Some(addr) = record.address {
            return Ok(IpAddr::V4(addr));
        }
        let addr = self.addresses.lease()?;
        record.address = Some(addr);
        tracing::debug!(sandbox_id = %sandbox.id(), address = %addr, "Network endpoint assigned");
        Ok(IpAddr::V4(addr))
    }

    async fn destroy(&self, sandbox: &SandboxHandle) -> Result<()> {
        let record = self.lock(&self.sandboxes)?.remove(sandbox.id());
        let Some(record) = record else {
            tracing::debug!(sandbox_id = %sandbox.id(), "Destroy of unknown sandbox, ignoring");
            return Ok(());
        };

        for pid in &record.pids {
            if let Err(e) = Self::kill_group(*pid, Signal::SIGKILL) {
                tracing::warn!(sandbox_id = %sandbox.id(), pid, error = %e, "Failed to kill process");
            }
        }
        if let Some(addr) = record.address {
            self.addresses.release(addr);
        }

        match tokio::fs::remove_dir_all(&record.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(sandbox_id = %sandbox.id(), "Local sandbox destroyed");
        Ok(())
    }

    async fn bind_process(
        &self,
        sandbox: &SandboxHandle,
        process: BoundProcess,
    ) -> Result<ProcessToken> {
        if process.program.trim().is_empty() {
            return Err(spawn_error(
                &process.program,
                io::Error::new(io::ErrorKind::InvalidInput, "empty program path"),
            ));
        }
        let root = {
            let sandboxes = self.lock(&self.sandboxes)?;
            sandboxes
                .get(sandbox.id())
                .map(|r| r.root.clone())
                .ok_or_else(|| DriverError::SandboxNotFound(sandbox.id().to_string()))?
        };

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.lock(&self.pending)?.insert(
            token,
            PendingProcess {
                sandbox_id: sandbox.id().to_string(),
                root,
                process,
            },
        );
        Ok(ProcessToken(token))
    }

    async fn start_process(
        &self,
        token: ProcessToken,
        stdio: StdioRequest,
    ) -> Result<StartedProcess> {
        let pending = self
            .lock(&self.pending)?
            .remove(&token.0)
            .ok_or(DriverError::UnknownToken(token.0))?;
        let PendingProcess {
            sandbox_id,
            root,
            process,
        } = pending;

        let cwd = working_dir(&root, process.working_dir.as_deref()).map_err(|e| match e {
            DriverError::Io(source) => spawn_error(&process.program, source),
            other => other,
        })?;

        let program = resolve_program(&root, &process.program);
        let mut cmd = Command::new(&program);
        cmd.args(&process.args).current_dir(&cwd).env_clear();

        let mut saw_path = false;
        let mut saw_container_ip = false;
        for entry in &process.env {
            match entry.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    saw_path |= key == "PATH";
                    saw_container_ip |= key == CONTAINER_IP_VAR;
                    cmd.env(key, value);
                }
                _ => tracing::warn!(entry = %entry, "Skipping malformed environment entry"),
            }
        }
        if !saw_path {
            cmd.env("PATH", DEFAULT_PATH);
        }
        if let Some(ip) = process.network_ip {
            if !saw_container_ip {
                cmd.env(CONTAINER_IP_VAR, ip.to_string());
            }
        }

        let pipe = |wanted: bool| if wanted { Stdio::piped() } else { Stdio::null() };
        cmd.stdin(pipe(stdio.stdin))
            .stdout(pipe(stdio.stdout))
            .stderr(pipe(stdio.stderr))
            .process_group(0);

        // hold the sandbox map across spawn so destroy cannot miss the pid
        let mut sandboxes = self.lock(&self.sandboxes)?;
        let record = sandboxes
            .get_mut(&sandbox_id)
            .ok_or_else(|| DriverError::SandboxNotFound(sandbox_id.clone()))?;

        let mut child = cmd
            .spawn()
            .map_err(|e| spawn_error(&process.program, e))?;
        let pid = child.id().ok_or_else(|| {
            spawn_error(
                &process.program,
                io::Error::other("process exited before its pid was read"),
            )
        })?;

        let stdin = child.stdin.take().map(|s| Box::new(s) as BoxedWriter);
        let stdout = child.stdout.take().map(|s| Box::new(s) as BoxedReader);
        let stderr = child.stderr.take().map(|s| Box::new(s) as BoxedReader);

        record.pids.insert(pid);
        drop(sandboxes);
        self.lock(&self.live)?.insert(pid, sandbox_id.clone());
        self.lock(&self.children)?.insert(pid, child);

        tracing::debug!(
            sandbox_id = %sandbox_id,
            pid,
            program = %program.display(),
            cwd = %cwd.display(),
            "Process started"
        );
        Ok(StartedProcess {
            pid,
            stdin,
            stdout,
            stderr,
        })
    }

    async fn signal(&self, pid: u32, mode: SignalMode) -> Result<()> {
        if !self.lock(&self.live)?.contains_key(&pid) {
            tracing::trace!(pid, "Signal to exited process ignored");
            return Ok(());
        }
        let signal = match mode {
            SignalMode::Terminate => Signal::SIGTERM,
            SignalMode::Kill => Signal::SIGKILL,
        };
        tracing::debug!(pid, %mode, "Signalling process group");
        Self::kill_group(pid, signal)
    }

    async fn wait_process(&self, pid: u32) -> Result<i32> {
        let mut child = self.lock(&self.children)?.remove(&pid).ok_or_else(|| {
            DriverError::Wait {
                pid,
                message: "process is not tracked or was already waited on".into(),
            }
        })?;

        let status = child.wait().await;

        let sandbox_id = self.lock(&self.live)?.remove(&pid);
        if let Some(sandbox_id) = sandbox_id {
            if let Some(record) = self.lock(&self.sandboxes)?.get_mut(&sandbox_id) {
                record.pids.remove(&pid);
            }
        }

        let status = status.map_err(|e| DriverError::Wait {
            pid,
            message: e.to_string(),
        })?;
        let code = match (status.code(), status.signal()) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => -1,
        };
        tracing::debug!(pid, exit_code = code, "Process exited");
        Ok(code)
    }
}
