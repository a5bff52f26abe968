//! Runtime configuration.
//!
//! Configuration can be built explicitly or loaded from environment
//! variables with sensible defaults.

use crate::error::CoreError;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Configuration shared by every container in a registry.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Address of the host as seen by containers.
    pub host_ip: IpAddr,
    /// How long a graceful stop waits before forcing termination.
    pub stop_grace_period: Duration,
    /// How long to wait for processes to confirm a forceful kill.
    pub kill_timeout: Duration,
    /// Maximum number of live containers (default: 100, 0 = unlimited).
    pub max_containers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            host_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            stop_grace_period: Duration::from_secs(10),
            kill_timeout: Duration::from_secs(5),
            max_containers: 100,
        }
    }
}

impl RuntimeConfig {
    /// Create a new config builder.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CORRAL_HOST_IP` | `127.0.0.1` |
    /// | `CORRAL_STOP_GRACE_SECS` | `10` |
    /// | `CORRAL_KILL_TIMEOUT_SECS` | `5` |
    /// | `CORRAL_MAX_CONTAINERS` | `100` |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            host_ip: std::env::var("CORRAL_HOST_IP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.host_ip),
            stop_grace_period: std::env::var("CORRAL_STOP_GRACE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.stop_grace_period),
            kill_timeout: std::env::var("CORRAL_KILL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.kill_timeout),
            max_containers: std::env::var("CORRAL_MAX_CONTAINERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_containers),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.host_ip.is_unspecified() {
            return Err(CoreError::Validation(
                "host_ip must be a concrete address".into(),
            ));
        }
        if self.kill_timeout.is_zero() {
            return Err(CoreError::Validation("kill_timeout must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for RuntimeConfig.
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Set the host address.
    pub fn host_ip(mut self, ip: impl Into<IpAddr>) -> Self {
        self.config.host_ip = ip.into();
        self
    }

    /// Set the graceful stop period.
    pub fn stop_grace_period(mut self, period: Duration) -> Self {
        self.config.stop_grace_period = period;
        self
    }

    /// Set the kill confirmation timeout.
    pub fn kill_timeout(mut self, timeout: Duration) -> Self {
        self.config.kill_timeout = timeout;
        self
    }

    /// Set the container limit (0 = unlimited).
    pub fn max_containers(mut self, max: usize) -> Self {
        self.config.max_containers = max;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<RuntimeConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
