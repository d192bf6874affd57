use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Bridge tuning. Every field has a default, so an empty TOML document is a
/// valid configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub call: CallConfig,
    pub batch: BatchConfig,
    pub retry: RetryConfig,
    pub health: HealthConfig,
    pub metrics: MetricsConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Per-attempt timeout when the caller does not pass one.
    pub default_timeout_ms: u64,
    /// How long `initialize()` waits for the backend's ready signal.
    pub init_timeout_ms: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self { default_timeout_ms: 30_000, init_timeout_ms: 10_000 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub window_ms: u64,
    pub max_size: usize,
    /// Upper bound on how long any request may sit in the queue.
    pub max_wait_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { window_ms: 50, max_size: 5, max_wait_ms: 200 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Total sends per logical call, the first attempt included.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { base_delay_ms: 100, max_delay_ms: 5_000, max_attempts: 3 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub cooldown_multiplier: f64,
    pub max_cooldown_ms: u64,
    /// Idle period after which a `__ping__` probe is sent. Zero disables it.
    pub ping_interval_ms: u64,
    pub success_window_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 5_000,
            cooldown_multiplier: 2.0,
            max_cooldown_ms: 60_000,
            ping_interval_ms: 30_000,
            success_window_ms: 60_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Samples retained per method.
    pub window_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { window_capacity: 1_000 }
    }
}

impl BridgeConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> ConfigError {
            ConfigError::Invalid { field, reason: reason.to_string() }
        }

        if self.call.default_timeout_ms == 0 {
            return Err(invalid("call.default_timeout_ms", "must be greater than zero"));
        }
        if self.batch.max_size == 0 {
            return Err(invalid("batch.max_size", "must be greater than zero"));
        }
        if self.batch.max_wait_ms < self.batch.window_ms {
            return Err(invalid("batch.max_wait_ms", "must not be shorter than batch.window_ms"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be greater than zero"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(invalid("retry.base_delay_ms", "must not exceed retry.max_delay_ms"));
        }
        if self.health.failure_threshold == 0 {
            return Err(invalid("health.failure_threshold", "must be greater than zero"));
        }
        if self.health.cooldown_multiplier.is_nan() || self.health.cooldown_multiplier < 1.0 {
            return Err(invalid("health.cooldown_multiplier", "must be at least 1.0"));
        }
        if self.health.cooldown_ms > self.health.max_cooldown_ms {
            return Err(invalid("health.cooldown_ms", "must not exceed health.max_cooldown_ms"));
        }
        if self.metrics.window_capacity == 0 {
            return Err(invalid("metrics.window_capacity", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.call.default_timeout_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.call.init_timeout_ms)
    }

    /// `None` when idle pings are disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        match self.health.ping_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn success_window(&self) -> Duration {
        Duration::from_millis(self.health.success_window_ms)
    }
}

impl BatchConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}
