//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Message bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Messages retained per run; the oldest are dropped first.
    pub max_history_per_run: usize,
    /// Default timeout for `request_analysis`.
    pub request_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_history_per_run: 100,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Knowledge store configuration.
#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    /// Maximum runs kept in the knowledge table (oldest evicted first).
    pub max_runs: usize,
    /// Age after which a global company cache entry is treated as a miss.
    pub max_cache_age: Duration,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            max_runs: 100,
            max_cache_age: Duration::from_secs(24 * 60 * 60), // 24 hours
        }
    }
}

/// Run registry housekeeping configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// How often the sweeper checks for abandoned runs.
    pub sweep_interval: Duration,
    /// Runs older than this are force-disposed by the sweeper.
    pub max_run_age: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60), // 1 minute
            max_run_age: Duration::from_secs(3600),  // 1 hour
        }
    }
}

/// Configuration for the whole coordination core.
#[derive(Debug, Clone, Default)]
pub struct CoordinationConfig {
    pub bus: BusConfig,
    pub knowledge: KnowledgeConfig,
    pub runs: RunConfig,
}

impl CoordinationConfig {
    /// Reject bounds and durations that would make the core unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.max_history_per_run == 0 {
            return Err(invalid("bus.max_history_per_run", "must be at least 1"));
        }
        if self.bus.request_timeout.is_zero() {
            return Err(invalid("bus.request_timeout", "must be non-zero"));
        }
        if self.knowledge.max_runs == 0 {
            return Err(invalid("knowledge.max_runs", "must be at least 1"));
        }
        if self.knowledge.max_cache_age.is_zero() {
            return Err(invalid("knowledge.max_cache_age", "must be non-zero"));
        }
        if self.runs.sweep_interval.is_zero() {
            return Err(invalid("runs.sweep_interval", "must be non-zero"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
