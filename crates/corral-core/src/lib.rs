//! # corral-core
//!
//! Container lifecycle and process execution for corral.
//!
//! This crate turns a [`SandboxDriver`](corral_driver::SandboxDriver) into
//! containers an orchestrator can create, run processes in, stream files
//! into and out of, and tear down.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    corral-core (host)                    │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌───────────────────┐   ┌──────────────────────────┐    │
//! │  │ ContainerRegistry │──▶│ HashMap<ContainerId,     │    │
//! │  │   - create()      │   │   Arc<Container>>        │    │
//! │  │   - get()         │   └──────────────────────────┘    │
//! │  │   - stop()        │                                   │
//! │  └───────────────────┘                                   │
//! │           │                                              │
//! │           ▼                                              │
//! │  ┌───────────────────┐   ┌──────────────────────────┐    │
//! │  │    Container      │──▶│ ProcessHandle (watch)    │    │
//! │  │  - run()          │   │   stdin/stdout/stderr    │    │
//! │  │  - stream_in()    │   │   pumps + monitor task   │    │
//! │  │  - stream_out()   │   └──────────────────────────┘    │
//! │  │  - stop()         │   ┌──────────────────────────┐    │
//! │  │  - info()         │──▶│ transfer (tar, blocking) │    │
//! │  └───────────────────┘   └──────────────────────────┘    │
//! │           │                                              │
//! └───────────┼──────────────────────────────────────────────┘
//!             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                corral-driver (SandboxDriver)             │
//! │     allocate / assign_network / bind / start / destroy   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use corral_core::{ContainerRegistry, ContainerSpec, OutputBuffer, ProcessIo, ProcessSpec, RuntimeConfig};
//! use corral_driver::{LocalDriver, LocalDriverConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = LocalDriver::new(LocalDriverConfig::default())?;
//! let registry = ContainerRegistry::new(Arc::new(driver), RuntimeConfig::from_env());
//!
//! let container = registry
//!     .create("c1", ContainerSpec::new("handle-1", "busybox").env("INSTANCE_INDEX", "0"))
//!     .await?;
//!
//! let stdout = OutputBuffer::new();
//! let process = container
//!     .run(
//!         ProcessSpec::new("/bin/sh").args(["-c", "echo $INSTANCE_INDEX"]),
//!         ProcessIo::new().stdout(stdout.clone()),
//!     )
//!     .await?;
//! assert_eq!(process.wait().await?, 0);
//! println!("{}", stdout.to_string_lossy());
//!
//! registry.stop(container.id(), false).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Container Lifecycle**: create, run, stop and destroy with cleanup on failure
//! - **Asynchronous Processes**: handles that many callers can wait on
//! - **Archive Transfer**: tar streams in and out with traversal rejection
//! - **Concurrent Access**: one registry shared across tasks

mod config;
mod container;
mod env;
mod error;
mod process;
mod registry;
mod transfer;

pub use config::{RuntimeConfig, RuntimeConfigBuilder};
pub use container::{Container, ContainerId, ContainerInfo, ContainerSpec, ContainerState};
pub use env::{merge_env, validate_env};
pub use error::{CoreError, Result, TransferError};
pub use process::{OutputBuffer, ProcessHandle, ProcessId, ProcessIo, ProcessSpec, ProcessStatus};
pub use registry::ContainerRegistry;
pub use transfer::TarStream;

pub use corral_driver::{ResourceLimits, SignalMode};
