//! # corral-driver
//!
//! Sandbox driver layer for corral containers.
//!
//! The container core never talks to the host isolation subsystem directly.
//! It calls the [`SandboxDriver`] capability instead, which makes the
//! lifecycle logic testable against fake drivers and keeps native details in
//! one place.
//!
//! ## Quick Start
//!
//! ```no_run
//! use corral_driver::{LocalDriver, LocalDriverConfig, SandboxDriver, SandboxSpec};
//!
//! # async fn example() -> corral_driver::Result<()> {
//! let driver = LocalDriver::new(
//!     LocalDriverConfig::builder()
//!         .image_root("/var/lib/corral/images")
//!         .state_dir("/tmp/corral")
//!         .build()?,
//! )?;
//!
//! let sandbox = driver.allocate("busybox:latest", &SandboxSpec::default()).await?;
//! let ip = driver.assign_network(&sandbox).await?;
//! println!("sandbox {} at {}", sandbox, ip);
//!
//! driver.destroy(&sandbox).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Capability Trait**: allocate, network, bind/start/signal/wait, destroy
//! - **Local Driver**: host-directory sandboxes with process-group control
//! - **Address Pool**: per-subnet IPv4 leasing
//! - **Path Translation**: pure mapping between Windows and Unix conventions

mod config;
mod driver;
mod error;
mod local;
mod network;
pub mod path;

pub use config::{LocalDriverConfig, LocalDriverConfigBuilder};
pub use driver::{
    BoundProcess, BoxedReader, BoxedWriter, ProcessToken, ResourceLimits, SandboxDriver,
    SandboxHandle, SandboxSpec, SignalMode, StartedProcess, StdioRequest,
};
pub use error::{DriverError, Result};
pub use local::{LocalDriver, CONTAINER_IP_VAR};
pub use network::AddressPool;
pub use path::PathStyle;
