//! Telemetry: structured logging and metrics.
//!
//! - **Logging**: JSON/pretty/compact `tracing` output with per-module levels
//! - **Metrics**: `metrics` facade counters, gauges and histograms for group
//!   lifecycle and admission outcomes
//!
//! # Example
//!
//! ```rust,no_run
//! use correlator_core::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::default();
//! init_telemetry(&config).expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{build_filter, init_logging, LogFormat, LoggingConfig, SpanEventConfig};
pub use metrics::{register_metric_descriptions, AdmissionMetrics, CorrelationMetrics};

use serde::{Deserialize, Serialize};

/// Unified telemetry configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Initialize logging and register metric descriptions.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<()> {
    init_logging(&config.logging)?;
    register_metric_descriptions();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.logging.level,
        "Telemetry initialized"
    );

    Ok(())
}
