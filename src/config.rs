//! Process-wide configuration and logging bootstrap.
//!
//! Layered the way the teacher crate's `config::Config::load` is:
//! defaults, then an optional YAML file, then environment variables
//! with a fixed prefix, each overriding the last.

use serde::Deserialize;

use crate::backoff::{BackoffConfig, BackoffStrategy, Jitter};

/// Environment variable prefix for all `WorkerConfig` fields.
pub const CONFIG_ENV_PREFIX: &str = "WORKFLOW";
/// Default configuration file name, checked in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "workflow.yaml";
/// Environment variable naming an additional required config file.
pub const CONFIG_ENV_VAR: &str = "WORKFLOW_CONFIG";

/// Retry policy knobs as they appear on the wire/in config files; see
/// [`crate::backoff::BackoffConfig`] for the runtime representation this
/// is converted into.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    pub max_attempts: u32,
    pub strategy: RetryStrategyConfig,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryStrategyConfig {
    Fixed,
    Exponential,
    ExponentialJitter,
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        Self::ExponentialJitter
    }
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: RetryStrategyConfig::ExponentialJitter,
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 60_000,
            jitter: true,
        }
    }
}

impl RetryPolicyConfig {
    pub fn to_backoff_config(&self) -> BackoffConfig {
        let strategy = match self.strategy {
            RetryStrategyConfig::Fixed => BackoffStrategy::Fixed,
            RetryStrategyConfig::Exponential | RetryStrategyConfig::ExponentialJitter => {
                BackoffStrategy::Exponential
            }
        };
        let jitter = match self.strategy {
            RetryStrategyConfig::ExponentialJitter if self.jitter => Jitter::Full,
            _ => Jitter::Disabled,
        };

        BackoffConfig::new()
            .with_strategy(strategy)
            .with_jitter(jitter)
            .with_initial(std::time::Duration::from_millis(self.initial_delay_ms))
            .with_max(std::time::Duration::from_millis(self.max_delay_ms))
            .with_multiplier(self.backoff_multiplier)
    }
}

/// Process-wide worker settings, loaded once at startup.
///
/// Every field carries a default, so `WorkerConfig::default()` is always
/// a valid zero-config value.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Wall-clock margin the batch coordinator reserves before its
    /// deadline elapses. Maps to the `SAFETY_MARGIN_MS` environment
    /// variable described in the adapter contract.
    pub safety_margin_ms: u64,
    /// Default retry policy for definitions that don't override it.
    pub default_retry: RetryPolicyConfig,
    /// TTL applied by the reference in-memory SAGA history store.
    pub saga_history_ttl_secs: u64,
    /// `tracing_subscriber::EnvFilter` directive string.
    pub log_filter: String,
    /// Opaque passthrough for the reference SAGA history store, for
    /// parity with the `SAGA_TABLE_NAME` environment contract; the
    /// in-memory store ignores it.
    pub saga_table_name: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            safety_margin_ms: 5_000,
            default_retry: RetryPolicyConfig::default(),
            saga_history_ttl_secs: 3_600,
            log_filter: "info".to_string(),
            saga_table_name: None,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from an optional file and the environment.
    ///
    /// Sources, later overriding earlier: built-in defaults, an optional
    /// `workflow.yaml` in the current directory, an optional file named
    /// by `path` or the `WORKFLOW_CONFIG` environment variable, then
    /// environment variables prefixed `WORKFLOW__`.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::new(DEFAULT_CONFIG_FILE, config::FileFormat::Yaml).required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::new(path, config::FileFormat::Yaml).required(true));
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(config::File::new(&path, config::FileFormat::Yaml).required(true));
        }

        let built = builder
            .add_source(
                config::Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        built.try_deserialize()
    }
}

/// Install a `tracing-subscriber` formatter honoring `config.log_filter`
/// (or the `RUST_LOG` environment variable, if set).
pub fn init_tracing(config: &WorkerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_filter.clone()));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_self_consistent() {
        let config = WorkerConfig::default();
        assert_eq!(config.safety_margin_ms, 5_000);
        assert_eq!(config.default_retry.max_attempts, 3);
        assert_eq!(config.saga_history_ttl_secs, 3_600);
    }

    #[test]
    fn retry_policy_converts_to_a_backoff_config_matching_its_knobs() {
        let policy = RetryPolicyConfig {
            max_attempts: 5,
            strategy: RetryStrategyConfig::Fixed,
            initial_delay_ms: 250,
            backoff_multiplier: 1.5,
            max_delay_ms: 5_000,
            jitter: false,
        };
        let backoff = policy.to_backoff_config();
        let rng = crate::backoff::FixedRngSource(0.0);
        assert_eq!(
            backoff.delay_for_attempt(0, None, &rng),
            std::time::Duration::from_millis(250)
        );
        assert_eq!(
            backoff.delay_for_attempt(7, None, &rng),
            std::time::Duration::from_millis(250)
        );
    }
}
