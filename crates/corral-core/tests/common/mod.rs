//! Shared fixtures for corral-core integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use corral_core::{ContainerRegistry, RuntimeConfig};
use corral_driver::{
    BoundProcess, LocalDriver, LocalDriverConfig, ProcessToken, SandboxDriver, SandboxHandle,
    SandboxSpec, SignalMode, StartedProcess, StdioRequest,
};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fresh scratch directory per call.
pub fn temp_dir(label: &str) -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "corral-it-{}-{}-{}",
        label,
        std::process::id(),
        id
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Local driver over `base` with a `base` image containing `/etc/motd`.
pub fn local_driver(base: &Path) -> LocalDriver {
    let images = base.join("images");
    std::fs::create_dir_all(images.join("base/etc")).unwrap();
    std::fs::write(images.join("base/etc/motd"), "welcome\n").unwrap();

    LocalDriver::new(
        LocalDriverConfig::builder()
            .image_root(images)
            .state_dir(base.join("state"))
            .subnet(Ipv4Addr::new(10, 77, 0, 0), 24)
            .build()
            .unwrap(),
    )
    .unwrap()
}

/// Short timeouts so stop tests finish quickly.
pub fn fast_config() -> RuntimeConfig {
    RuntimeConfig::builder()
        .stop_grace_period(Duration::from_millis(500))
        .kill_timeout(Duration::from_secs(5))
        .max_containers(0)
        .build()
        .unwrap()
}

/// Wraps [`LocalDriver`] and injects failures on demand.
pub struct FakeDriver {
    pub inner: LocalDriver,
    pub fail_network: AtomicBool,
    pub fail_destroy: AtomicBool,
    pub allocations: AtomicUsize,
    pub destroys: AtomicUsize,
}

impl FakeDriver {
    pub fn new(inner: LocalDriver) -> Self {
        Self {
            inner,
            fail_network: AtomicBool::new(false),
            fail_destroy: AtomicBool::new(false),
            allocations: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
        }
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxDriver for FakeDriver {
    fn name(&self) -> &str {
        "fake"
    }

    async fn allocate(
        &self,
        image: &str,
        spec: &SandboxSpec,
    ) -> corral_driver::Result<SandboxHandle> {
        let sandbox = self.inner.allocate(image, spec).await?;
        self.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(sandbox)
    }

    async fn assign_network(&self, sandbox: &SandboxHandle) -> corral_driver::Result<IpAddr> {
        if self.fail_network.load(Ordering::SeqCst) {
            return Err(corral_driver::DriverError::NetworkExhausted(
                "injected failure".into(),
            ));
        }
        self.inner.assign_network(sandbox).await
    }

    async fn destroy(&self, sandbox: &SandboxHandle) -> corral_driver::Result<()> {
        if self.fail_destroy.load(Ordering::SeqCst) {
            return Err(corral_driver::DriverError::Config("injected failure".into()));
        }
        self.destroys.fetch_add(1, Ordering::SeqCst);
        self.inner.destroy(sandbox).await
    }

    async fn bind_process(
        &self,
        sandbox: &SandboxHandle,
        process: BoundProcess,
    ) -> corral_driver::Result<ProcessToken> {
        self.inner.bind_process(sandbox, process).await
    }

    async fn start_process(
        &self,
        token: ProcessToken,
        stdio: StdioRequest,
    ) -> corral_driver::Result<StartedProcess> {
        self.inner.start_process(token, stdio).await
    }

    async fn signal(&self, pid: u32, mode: SignalMode) -> corral_driver::Result<()> {
        self.inner.signal(pid, mode).await
    }

    async fn wait_process(&self, pid: u32) -> corral_driver::Result<i32> {
        self.inner.wait_process(pid).await
    }
}

/// Log to the test writer when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Registry over a fresh [`FakeDriver`], returning both.
pub fn fake_registry(label: &str) -> (ContainerRegistry, Arc<FakeDriver>, PathBuf) {
    init_tracing();
    let base = temp_dir(label);
    let fake = Arc::new(FakeDriver::new(local_driver(&base)));
    let driver: Arc<dyn SandboxDriver> = fake.clone();
    (ContainerRegistry::new(driver, fast_config()), fake, base)
}

/// Build a tar archive of regular files.
pub fn tar_of(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder
            .append_data(&mut header, name, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

/// A single-entry archive whose name is written raw, bypassing the
/// traversal checks the tar builder applies.
pub fn raw_tar(name: &str, contents: &str) -> Vec<u8> {
    let mut header = tar::Header::new_old();
    header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();

    let mut bytes = header.as_bytes().to_vec();
    bytes.extend_from_slice(contents.as_bytes());
    bytes.resize(bytes.len().next_multiple_of(512), 0);
    bytes.extend_from_slice(&[0u8; 1024]);
    bytes
}

/// Read every regular file of an archive as (name, contents).
pub fn untar(bytes: &[u8]) -> Vec<(String, String)> {
    let mut archive = tar::Archive::new(bytes);
    let mut files = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        if entry.header().entry_type() != tar::EntryType::Regular {
            continue;
        }
        let name = entry.path().unwrap().display().to_string();
        let mut contents = String::new();
        std::io::Read::read_to_string(&mut entry, &mut contents).unwrap();
        files.push((name, contents));
    }
    files.sort();
    files
}

/// Whether any file named `name` exists anywhere under `dir`.
pub fn exists_anywhere(dir: &Path, name: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let path = entry.path();
        entry.file_name() == name
            || (entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
                && exists_anywhere(&path, name))
    })
}
