//! Configuration types

use crate::error::{ConfigError, SwrResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default interval between retries of a failed fetch.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 5_000;

/// How a binding initialises an entry that is absent from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapMode {
    /// Defer initialisation by one scheduler tick and re-check the store, so
    /// consumers bootstrapping the same key in the same turn share one entry.
    #[default]
    Deferred,
    /// Initialise within the reaction that found the key absent.
    Immediate,
}

impl BootstrapMode {
    /// Parse from the environment/config string representation.
    pub fn from_str_lossy(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "deferred" => Some(Self::Deferred),
            "immediate" => Some(Self::Immediate),
            _ => None,
        }
    }
}

/// Periodic retry of failed fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Milliseconds between retry attempts while the entry holds an error.
    pub interval_ms: u64,
    /// Stop retrying after this many consecutive attempts. `None` retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            max_attempts: None,
        }
    }
}

impl RetryConfig {
    /// Retry every `interval` without an attempt cap.
    ///
    /// The interval is rounded up to whole milliseconds, so only a zero
    /// `interval` fails validation.
    pub fn every(interval: Duration) -> Self {
        let partial = u128::from(interval.subsec_nanos() % 1_000_000 != 0);
        Self {
            interval_ms: u64::try_from(interval.as_millis() + partial).unwrap_or(u64::MAX),
            max_attempts: None,
        }
    }

    /// Cap the number of consecutive attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Interval between attempts.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Validate the retry settings.
    pub fn validate(&self) -> SwrResult<()> {
        if self.interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.interval_ms".to_string(),
                value: self.interval_ms.to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero when set".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Master configuration for resource bindings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SwrConfig {
    /// Entry initialisation strategy for absent keys.
    #[serde(default)]
    pub bootstrap: BootstrapMode,
    /// Retry failed fetches periodically. Disabled when absent.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl SwrConfig {
    /// Parse a configuration from TOML and validate it.
    ///
    /// ```toml
    /// bootstrap = "deferred"
    ///
    /// [retry]
    /// interval_ms = 2000
    /// max_attempts = 5
    /// ```
    pub fn from_toml_str(input: &str) -> SwrResult<Self> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Create SwrConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `SWR_BOOTSTRAP`: `deferred` or `immediate` (default: deferred)
    /// - `SWR_RETRY_INTERVAL_MS`: enables retry-on-error with this interval
    /// - `SWR_RETRY_MAX_ATTEMPTS`: attempt cap for retry-on-error
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let bootstrap = std::env::var("SWR_BOOTSTRAP")
            .ok()
            .and_then(|s| BootstrapMode::from_str_lossy(&s))
            .unwrap_or_default();

        let retry = std::env::var("SWR_RETRY_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(|interval_ms| RetryConfig {
                interval_ms,
                max_attempts: std::env::var("SWR_RETRY_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|s| s.parse().ok()),
            });

        Self { bootstrap, retry }
    }

    /// Set the bootstrap mode.
    pub fn with_bootstrap(mut self, bootstrap: BootstrapMode) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Enable retry-on-error.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(SwrError::Config) if invalid.
    pub fn validate(&self) -> SwrResult<()> {
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
