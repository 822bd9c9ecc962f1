//! Configuration management.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CorrelationError, Result};
use crate::events::NO_CORRELATION_ID;
use crate::telemetry::TelemetryConfig;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Grouping behaviour
    #[serde(default)]
    pub correlation: CorrelationConfig,

    /// Idempotent admission filter
    #[serde(default)]
    pub idempotent: IdempotentConfig,

    /// Logging
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Group id used for events without a correlation id
    #[serde(default = "default_no_correlation_id")]
    pub no_correlation_id: String,

    /// Age after which a sweep claims an incomplete group
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Report expired groups as errors instead of forwarding them partially
    #[serde(default = "default_fail_on_timeout")]
    pub fail_on_timeout: bool,

    /// Number of drained group ids remembered to drop late arrivals (0 = off)
    #[serde(default)]
    pub processed_group_capacity: usize,

    /// Registry shard amount (power of two); dashmap's default when unset
    #[serde(default)]
    pub shard_amount: Option<usize>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            no_correlation_id: default_no_correlation_id(),
            timeout: None,
            fail_on_timeout: default_fail_on_timeout(),
            processed_group_capacity: 0,
            shard_amount: None,
        }
    }
}

/// Which part of an event the idempotent filter keys on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdSource {
    /// The transport-supplied unique id
    #[default]
    UniqueId,
    /// SHA-256 of the serialized payload
    SecureHash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotentConfig {
    /// Directory holding one id log per consumer
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Logical consumer identity; names the id log
    #[serde(default = "default_consumer")]
    pub consumer: String,

    /// Id extraction strategy
    #[serde(default)]
    pub id_source: IdSource,
}

impl Default for IdempotentConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            consumer: default_consumer(),
            id_source: IdSource::default(),
        }
    }
}

// Default value functions
fn default_no_correlation_id() -> String { NO_CORRELATION_ID.to_string() }
fn default_fail_on_timeout() -> bool { true }
fn default_store_dir() -> PathBuf { PathBuf::from(".correlator/idempotent") }
fn default_consumer() -> String { "default".to_string() }

impl Config {
    /// Load configuration from the environment (`CORRELATOR__SECTION__KEY`).
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("CORRELATOR").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("CORRELATOR").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        let correlation = &self.correlation;
        if correlation.no_correlation_id.is_empty() {
            return Err(CorrelationError::configuration(
                "correlation.no_correlation_id must not be empty",
            ));
        }
        if correlation.timeout == Some(Duration::ZERO) {
            return Err(CorrelationError::configuration(
                "correlation.timeout must be greater than zero",
            ));
        }
        if let Some(shards) = correlation.shard_amount {
            if shards < 2 || !shards.is_power_of_two() {
                return Err(CorrelationError::configuration(format!(
                    "correlation.shard_amount must be a power of two greater than 1, got {}",
                    shards
                )));
            }
        }
        if self.idempotent.consumer.trim().is_empty() {
            return Err(CorrelationError::configuration(
                "idempotent.consumer must not be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.correlation.no_correlation_id, "no-id");
        assert_eq!(config.correlation.timeout, None);
        assert!(config.correlation.fail_on_timeout);
        assert_eq!(config.correlation.processed_group_capacity, 0);
        assert_eq!(config.idempotent.consumer, "default");
        assert_eq!(config.idempotent.id_source, IdSource::UniqueId);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[correlation]
timeout = "250ms"
fail_on_timeout = false
processed_group_capacity = 100
shard_amount = 8

[idempotent]
consumer = "orders"
id_source = "secure_hash"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.correlation.timeout, Some(Duration::from_millis(250)));
        assert!(!config.correlation.fail_on_timeout);
        assert_eq!(config.correlation.processed_group_capacity, 100);
        assert_eq!(config.correlation.shard_amount, Some(8));
        assert_eq!(config.idempotent.consumer, "orders");
        assert_eq!(config.idempotent.id_source, IdSource::SecureHash);
        assert_eq!(config.correlation.no_correlation_id, "no-id");
    }

    #[test]
    fn test_validate_rejects_bad_shard_amount() {
        let mut config = Config::default();
        config.correlation.shard_amount = Some(6);
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn test_validate_rejects_zero_timeout_and_empty_names() {
        let mut config = Config::default();
        config.correlation.timeout = Some(Duration::ZERO);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.correlation.no_correlation_id.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.idempotent.consumer = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
