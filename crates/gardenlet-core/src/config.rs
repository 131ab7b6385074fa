//! Polling configuration for component deployers
//!
//! Each component ships built-in [`WaitTimings`]. A [`DeployerConfig`] loaded
//! from YAML can override them globally or per component:
//!
//! ```yaml
//! defaults:
//!   interval: 5s
//! components:
//!   infrastructure:
//!     timeout: 15m
//!     severeThreshold: 1m
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{CoreError, Result};

/// Polling parameters of a wait operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitTimings {
    /// Time between two polls
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Time after which a retriable failure stops being retried
    #[serde(with = "humantime_serde")]
    pub severe_threshold: Duration,

    /// Upper bound for the whole wait
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl WaitTimings {
    pub const fn new(interval: Duration, severe_threshold: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            severe_threshold,
            timeout,
        }
    }

    /// Check that the timings describe a terminating poll loop
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(CoreError::InvalidConfig {
                message: "interval must be greater than zero".to_string(),
            });
        }
        if self.severe_threshold > self.timeout {
            return Err(CoreError::InvalidConfig {
                message: format!(
                    "severeThreshold ({:?}) must not exceed timeout ({:?})",
                    self.severe_threshold, self.timeout
                ),
            });
        }
        Ok(())
    }

    /// Apply the fields set in an override
    pub fn overlay(mut self, other: &TimingsOverride) -> Self {
        if let Some(interval) = other.interval {
            self.interval = interval;
        }
        if let Some(severe_threshold) = other.severe_threshold {
            self.severe_threshold = severe_threshold;
        }
        if let Some(timeout) = other.timeout {
            self.timeout = timeout;
        }
        self
    }
}

impl Default for WaitTimings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            severe_threshold: Duration::from_secs(30),
            timeout: Duration::from_secs(180),
        }
    }
}

/// Partial timings; unset fields keep the component's built-in value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingsOverride {
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub interval: Option<Duration>,

    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub severe_threshold: Option<Duration>,

    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

/// Deployer configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployerConfig {
    /// Overrides applied to every component
    #[serde(default)]
    pub defaults: TimingsOverride,

    /// Overrides per component name
    #[serde(default)]
    pub components: BTreeMap<String, TimingsOverride>,
}

impl DeployerConfig {
    /// Parse a configuration document
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Effective timings of a component with the given built-in defaults
    pub fn timings_for(&self, component: &str, builtin: WaitTimings) -> Result<WaitTimings> {
        let mut timings = builtin.overlay(&self.defaults);
        if let Some(component_override) = self.components.get(component) {
            timings = timings.overlay(component_override);
        }
        timings.validate()?;
        Ok(timings)
    }
}
