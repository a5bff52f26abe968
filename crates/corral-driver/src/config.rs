//! Configuration for the local driver.

use crate::error::{DriverError, Result};
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Configuration for [`LocalDriver`](crate::LocalDriver).
#[derive(Debug, Clone)]
pub struct LocalDriverConfig {
    /// Directory holding named images (one directory per image).
    pub image_root: PathBuf,
    /// Directory under which per-sandbox state and roots are created.
    pub state_dir: PathBuf,
    /// Base address of the container subnet.
    pub subnet: Ipv4Addr,
    /// Prefix length of the container subnet (8-30).
    pub prefix_len: u8,
}

impl Default for LocalDriverConfig {
    fn default() -> Self {
        Self {
            image_root: PathBuf::from("/var/lib/corral/images"),
            state_dir: PathBuf::from("/tmp/corral"),
            subnet: Ipv4Addr::new(10, 254, 0, 0),
            prefix_len: 16,
        }
    }
}

impl LocalDriverConfig {
    /// Create a new config builder.
    pub fn builder() -> LocalDriverConfigBuilder {
        LocalDriverConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.image_root.as_os_str().is_empty() {
            return Err(DriverError::Config("image_root is required".into()));
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err(DriverError::Config("state_dir is required".into()));
        }
        if !(8..=30).contains(&self.prefix_len) {
            return Err(DriverError::Config(format!(
                "prefix_len must be between 8 and 30, got {}",
                self.prefix_len
            )));
        }
        Ok(())
    }
}

/// Builder for LocalDriverConfig.
#[derive(Debug, Default)]
pub struct LocalDriverConfigBuilder {
    config: LocalDriverConfig,
}

impl LocalDriverConfigBuilder {
    /// Set the image root directory.
    pub fn image_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.image_root = path.into();
        self
    }

    /// Set the state directory.
    pub fn state_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.state_dir = path.into();
        self
    }

    /// Set the container subnet.
    pub fn subnet(mut self, base: Ipv4Addr, prefix_len: u8) -> Self {
        self.config.subnet = base;
        self.config.prefix_len = prefix_len;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<LocalDriverConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
