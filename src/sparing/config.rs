//! Sparing Configuration
//!
//! Engine-wide tunables (operation timeout and confirmation flag) plus the
//! wait protocol timings. The tunables are owned by an engine instance and
//! injected into every component that reads them; the config-update job is
//! the only writer.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

// =============================================================================
// Constants
// =============================================================================

/// Default operation timeout in seconds
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u32 = 60;

/// Smallest operation timeout accepted by the config-update job
pub const MIN_OPERATION_TIMEOUT_SECS: u32 = 1;

/// Largest operation timeout accepted by the config-update job
pub const MAX_OPERATION_TIMEOUT_SECS: u32 = 600;

/// No confirmation wait gives up before this many seconds
pub const TIMEOUT_FLOOR_SECS: u32 = 6;

/// Interval between confirmation polls
pub const POLL_INTERVAL_MS: u64 = 1000;

/// Delay before the first confirmation poll
pub const SETTLE_DELAY_MS: u64 = 100;

/// Interval between polls while waiting for an object to become Ready
pub const READY_POLL_INTERVAL_MS: u64 = 3000;

// =============================================================================
// Wait Policy
// =============================================================================

/// Timings of the confirmation wait protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitPolicy {
    /// Minimum effective timeout in seconds
    pub timeout_floor_secs: u32,
    /// Interval between polls
    pub poll_interval_ms: u64,
    /// Delay before the first poll
    pub settle_delay_ms: u64,
    /// Interval between polls while waiting for Ready
    pub ready_poll_interval_ms: u64,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout_floor_secs: TIMEOUT_FLOOR_SECS,
            poll_interval_ms: POLL_INTERVAL_MS,
            settle_delay_ms: SETTLE_DELAY_MS,
            ready_poll_interval_ms: READY_POLL_INTERVAL_MS,
        }
    }
}

impl WaitPolicy {
    /// Configured timeout raised to the floor. The floor itself never
    /// drops below `TIMEOUT_FLOOR_SECS`.
    pub fn effective_timeout_secs(&self, configured_secs: u32) -> u32 {
        configured_secs.max(self.timeout_floor_secs.max(TIMEOUT_FLOOR_SECS))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_floor_secs < TIMEOUT_FLOOR_SECS {
            return Err(Error::Configuration(format!(
                "wait.timeout_floor_secs must be at least {} (got {})",
                TIMEOUT_FLOOR_SECS, self.timeout_floor_secs
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Configuration(
                "wait.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.ready_poll_interval_ms == 0 {
            return Err(Error::Configuration(
                "wait.ready_poll_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Sparing Configuration
// =============================================================================

/// Engine-wide sparing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparingConfig {
    /// Seconds to wait for a confirmation before giving up
    pub operation_timeout_secs: u32,
    /// Wait for the virtual drive to acknowledge topology changes.
    /// Disabling is only meant for testing.
    pub confirmation_enabled: bool,
    /// Wait protocol timings
    pub wait: WaitPolicy,
}

impl Default for SparingConfig {
    fn default() -> Self {
        Self {
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            confirmation_enabled: true,
            wait: WaitPolicy::default(),
        }
    }
}

impl SparingConfig {
    /// Check every value against its documented range
    pub fn validate(&self) -> Result<()> {
        validate_operation_timeout(self.operation_timeout_secs)?;
        self.wait.validate()
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: SparingConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }
}

/// Check an operation timeout against the accepted range
pub fn validate_operation_timeout(secs: u32) -> Result<()> {
    if !(MIN_OPERATION_TIMEOUT_SECS..=MAX_OPERATION_TIMEOUT_SECS).contains(&secs) {
        return Err(Error::ConfigValue {
            field: "operation_timeout_secs",
            value: secs,
            min: MIN_OPERATION_TIMEOUT_SECS,
            max: MAX_OPERATION_TIMEOUT_SECS,
        });
    }
    Ok(())
}

// =============================================================================
// Shared Tunables
// =============================================================================

/// Shared handle to the live configuration of one engine instance
#[derive(Debug, Clone, Default)]
pub struct SparingTunables {
    inner: Arc<RwLock<SparingConfig>>,
}

impl SparingTunables {
    pub fn new(config: SparingConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Copy of the current configuration
    pub fn snapshot(&self) -> SparingConfig {
        self.inner.read().clone()
    }

    pub fn operation_timeout_secs(&self) -> u32 {
        self.inner.read().operation_timeout_secs
    }

    pub fn confirmation_enabled(&self) -> bool {
        self.inner.read().confirmation_enabled
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        self.inner.read().wait.clone()
    }

    /// Timeout used while waiting for a copy to finish or fail. Short
    /// test timeouts are honoured; anything at or above the default is
    /// stretched to the maximum since the checkpoint move can be slow.
    pub fn copy_wait_timeout_secs(&self) -> u32 {
        let configured = self.operation_timeout_secs();
        if configured < DEFAULT_OPERATION_TIMEOUT_SECS {
            configured
        } else {
            MAX_OPERATION_TIMEOUT_SECS
        }
    }

    pub fn set_operation_timeout_secs(&self, secs: u32) -> Result<()> {
        validate_operation_timeout(secs)?;
        let mut config = self.inner.write();
        info!(
            "Changed operation timeout from {}s to {}s",
            config.operation_timeout_secs, secs
        );
        config.operation_timeout_secs = secs;
        Ok(())
    }

    pub fn set_confirmation_enabled(&self, enabled: bool) {
        if !enabled {
            warn!("Operation confirmation disabled; jobs will not wait for the virtual drive");
        }
        self.inner.write().confirmation_enabled = enabled;
    }

    /// Restore the compiled-in timeout and confirmation defaults
    pub fn reset(&self) {
        let mut config = self.inner.write();
        config.operation_timeout_secs = DEFAULT_OPERATION_TIMEOUT_SECS;
        config.confirmation_enabled = true;
        info!(
            "Restored default operation confirmation: {} timeout: {}s",
            config.confirmation_enabled, config.operation_timeout_secs
        );
    }
}
