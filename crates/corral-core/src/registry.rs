//! Container registry for lifecycle management of multiple containers.

use crate::config::RuntimeConfig;
use crate::container::{Container, ContainerId, ContainerInfo, ContainerSpec, ContainerState};
use crate::error::{CoreError, Result};
use crate::process::{ProcessHandle, ProcessIo, ProcessSpec};
use crate::transfer::TarStream;
use corral_driver::SandboxDriver;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncRead;

enum Slot {
    /// Create in progress. Holds the id and handle against duplicates.
    Reserved,
    Ready(Arc<Container>),
}

#[derive(Default)]
struct Entries {
    by_id: HashMap<ContainerId, Slot>,
    handles: HashMap<String, ContainerId>,
}

/// Releases a reserved id and handle unless the create committed.
struct Reservation {
    entries: Arc<Mutex<Entries>>,
    id: ContainerId,
    handle: String,
    committed: bool,
}

impl Reservation {
    fn commit(mut self, container: Arc<Container>) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CoreError::Validation("container registry lock poisoned".into()))?;
        entries.by_id.insert(self.id.clone(), Slot::Ready(container));
        self.committed = true;
        Ok(())
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            if matches!(entries.by_id.get(&self.id), Some(Slot::Reserved)) {
                entries.by_id.remove(&self.id);
                entries.handles.remove(&self.handle);
            }
        }
    }
}

/// Manages every container on this host.
///
/// The registry maps container ids (and handles) to [`Container`]s. Its
/// lock only guards the map and is never held across a container
/// operation; each container serializes its own lifecycle. An id is
/// reserved for the whole duration of its create, so a concurrent create
/// with the same id or handle fails fast instead of racing.
pub struct ContainerRegistry {
    entries: Arc<Mutex<Entries>>,
    driver: Arc<dyn SandboxDriver>,
    config: RuntimeConfig,
}

impl ContainerRegistry {
    /// Create an empty registry backed by `driver`.
    pub fn new(driver: Arc<dyn SandboxDriver>, config: RuntimeConfig) -> Self {
        tracing::info!(driver = driver.name(), "Creating container registry");
        Self {
            entries: Arc::new(Mutex::new(Entries::default())),
            driver,
            config,
        }
    }

    /// Get the registry configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Get the sandbox driver.
    pub fn driver(&self) -> &Arc<dyn SandboxDriver> {
        &self.driver
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entries>> {
        self.entries
            .lock()
            .map_err(|_| CoreError::Validation("container registry lock poisoned".into()))
    }

    fn reserve(&self, id: &ContainerId, handle: &str) -> Result<Reservation> {
        let mut entries = self.lock()?;
        if entries.by_id.contains_key(id) {
            return Err(CoreError::Validation(format!(
                "container id {id} already exists"
            )));
        }
        if entries.handles.contains_key(handle) {
            return Err(CoreError::Validation(format!(
                "container handle {handle} already exists"
            )));
        }
        if self.config.max_containers > 0 && entries.by_id.len() >= self.config.max_containers {
            return Err(CoreError::Validation(format!(
                "max container limit reached ({})",
                self.config.max_containers
            )));
        }

        entries.by_id.insert(id.clone(), Slot::Reserved);
        entries.handles.insert(handle.to_string(), id.clone());
        Ok(Reservation {
            entries: Arc::clone(&self.entries),
            id: id.clone(),
            handle: handle.to_string(),
            committed: false,
        })
    }

    /// Create and register a container.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for an empty or duplicate id or
    /// handle, or when the container limit is reached. Allocation failures
    /// leave nothing registered.
    pub async fn create(
        &self,
        id: impl Into<ContainerId>,
        spec: ContainerSpec,
    ) -> Result<Arc<Container>> {
        let id = id.into();
        if id.is_empty() {
            return Err(CoreError::Validation("container id must not be empty".into()));
        }
        if spec.handle.is_empty() {
            return Err(CoreError::Validation("container handle must not be empty".into()));
        }

        let reservation = self.reserve(&id, &spec.handle)?;
        let container = Container::create(
            id.clone(),
            spec,
            self.config.clone(),
            Arc::clone(&self.driver),
        )
        .await?;
        let container = Arc::new(container);
        reservation.commit(Arc::clone(&container))?;

        tracing::info!(container_id = %id, "Container registered");
        Ok(container)
    }

    /// Look up a container by id.
    pub fn get(&self, id: &ContainerId) -> Result<Arc<Container>> {
        match self.lock()?.by_id.get(id) {
            Some(Slot::Ready(container)) => Ok(Arc::clone(container)),
            _ => Err(CoreError::NotFound(id.to_string())),
        }
    }

    /// Look up a container by handle.
    pub fn get_by_handle(&self, handle: &str) -> Result<Arc<Container>> {
        let entries = self.lock()?;
        let slot = entries
            .handles
            .get(handle)
            .and_then(|id| entries.by_id.get(id));
        match slot {
            Some(Slot::Ready(container)) => Ok(Arc::clone(container)),
            _ => Err(CoreError::NotFound(handle.to_string())),
        }
    }

    /// Check if a container exists.
    pub fn exists(&self, id: &ContainerId) -> bool {
        self.get(id).is_ok()
    }

    /// Start a process in a container.
    pub async fn run(
        &self,
        id: &ContainerId,
        spec: ProcessSpec,
        io: ProcessIo,
    ) -> Result<ProcessHandle> {
        self.get(id)?.run(spec, io).await
    }

    /// Unpack a tar stream into a container.
    pub async fn stream_in<R>(&self, id: &ContainerId, target: &str, reader: R) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.get(id)?.stream_in(target, reader).await
    }

    /// Archive a path out of a container.
    pub async fn stream_out(&self, id: &ContainerId, source: &str) -> Result<TarStream> {
        self.get(id)?.stream_out(source).await
    }

    /// Snapshot a container.
    pub fn info(&self, id: &ContainerId) -> Result<ContainerInfo> {
        Ok(self.get(id)?.info())
    }

    /// Stop a container and, once it reports destroyed, unregister it.
    ///
    /// A container whose sandbox could not be destroyed stays registered
    /// so the stop can be retried.
    pub async fn stop(&self, id: &ContainerId, kill: bool) -> Result<()> {
        let container = self.get(id)?;
        let result = container.stop(kill).await;

        if container.state() == ContainerState::Destroyed {
            self.remove(&container)?;
            tracing::info!(container_id = %id, "Container unregistered");
        }
        result
    }

    fn remove(&self, container: &Arc<Container>) -> Result<()> {
        let mut entries = self.lock()?;
        let same = matches!(
            entries.by_id.get(container.id()),
            Some(Slot::Ready(current)) if Arc::ptr_eq(current, container)
        );
        if same {
            entries.by_id.remove(container.id());
            entries.handles.remove(container.handle());
        }
        Ok(())
    }

    /// Kill and destroy every registered container.
    ///
    /// This is useful for cleanup during shutdown. Errors during individual
    /// container teardown are logged but do not stop the process.
    pub async fn destroy_all(&self) -> Result<()> {
        let containers: Vec<Arc<Container>> = {
            let entries = self.lock()?;
            entries
                .by_id
                .values()
                .filter_map(|slot| match slot {
                    Slot::Ready(container) => Some(Arc::clone(container)),
                    Slot::Reserved => None,
                })
                .collect()
        };

        tracing::info!(count = containers.len(), "Destroying all containers");

        for container in containers {
            if let Err(e) = self.stop(container.id(), true).await {
                tracing::error!(container_id = %container.id(), error = %e, "Failed to destroy container");
            }
        }
        Ok(())
    }

    /// List all registered container ids, sorted.
    pub fn list(&self) -> Vec<ContainerId> {
        let mut ids: Vec<ContainerId> = self
            .entries
            .lock()
            .map(|entries| {
                entries
                    .by_id
                    .iter()
                    .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// List the handles of all registered containers, sorted.
    pub fn handles(&self) -> Vec<String> {
        let mut handles: Vec<String> = self
            .entries
            .lock()
            .map(|entries| {
                entries
                    .handles
                    .iter()
                    .filter(|(_, id)| matches!(entries.by_id.get(*id), Some(Slot::Ready(_))))
                    .map(|(handle, _)| handle.clone())
                    .collect()
            })
            .unwrap_or_default();
        handles.sort();
        handles
    }

    /// Get the number of registered containers.
    pub fn count(&self) -> usize {
        self.list().len()
    }
}
