//! Error handling for the correlation engine.
//!
//! This module provides:
//! - A single error type carrying a stable, machine-readable code
//! - Severity classification that drives log levels
//! - Structured details (group id, context key-value pairs)
//! - Source chaining for strategy, sink and I/O failures
//! - Metrics integration for error tracking
//!
//! The engine never retries internally. Every error is handed back to the
//! caller that triggered it, so the surrounding pipeline decides what to do.
//!
//! # Usage
//!
//! ```rust,ignore
//! use correlator_core::error::{CorrelationError, ErrorCode, Result};
//!
//! fn admit(seq: u32, size: usize) -> Result<()> {
//!     if seq as usize > size {
//!         return Err(CorrelationError::sequence_out_of_range("order-42", seq, size));
//!     }
//!     Ok(())
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for correlation operations.
pub type Result<T> = std::result::Result<T, CorrelationError>;

/// Boxed error returned by caller-supplied strategies and sinks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by callers for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Correlation Errors (1000-1099)
    GroupAlreadyDrained,
    SequenceOutOfRange,
    CorrelationTimeout,

    // Routing Errors (1100-1199)
    AggregationFailed,
    DeliveryFailed,

    // Admission Errors (1200-1299)
    FilterMisconfigured,
    InvalidUniqueId,

    // Storage Errors (2000-2099)
    StoreIoError,
    StoreCorrupted,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::GroupAlreadyDrained => 1000,
            Self::SequenceOutOfRange => 1001,
            Self::CorrelationTimeout => 1002,

            Self::AggregationFailed => 1100,
            Self::DeliveryFailed => 1101,

            Self::FilterMisconfigured => 1200,
            Self::InvalidUniqueId => 1201,

            Self::StoreIoError => 2000,
            Self::StoreCorrupted => 2001,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::ConfigurationError => 5000,
            Self::InvalidConfiguration => 5001,

            Self::InternalError => 9000,
        }
    }

    /// Whether this error is a routing-level failure (the event was
    /// consumed, but nothing reached the sink).
    pub const fn is_routing_error(&self) -> bool {
        matches!(
            self,
            Self::AggregationFailed | Self::DeliveryFailed | Self::CorrelationTimeout
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "correlation",
            1100..=1199 => "routing",
            1200..=1299 => "admission",
            2000..=2099 => "storage",
            2200..=2299 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, late arrivals)
    Low,
    /// Operational issues (timeouts, strategy failures)
    Medium,
    /// System errors (storage, misconfiguration)
    High,
    /// Broken invariants
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::GroupAlreadyDrained
            | ErrorCode::SequenceOutOfRange
            | ErrorCode::InvalidUniqueId
            | ErrorCode::DeserializationError => Self::Low,

            ErrorCode::CorrelationTimeout
            | ErrorCode::AggregationFailed
            | ErrorCode::DeliveryFailed
            | ErrorCode::SerializationError => Self::Medium,

            ErrorCode::FilterMisconfigured
            | ErrorCode::StoreIoError
            | ErrorCode::StoreCorrupted
            | ErrorCode::ConfigurationError
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Correlation group the error relates to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The error type for the correlation engine.
#[derive(Error, Debug)]
pub struct CorrelationError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Caller-facing message
    message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<BoxError>,
}

impl fmt::Display for CorrelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl CorrelationError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both caller-facing and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// A member was offered to a group that has already been claimed.
    pub fn group_drained(group_id: impl Into<String>) -> Self {
        let group_id = group_id.into();
        Self::new(
            ErrorCode::GroupAlreadyDrained,
            format!("Event group already drained: {}", group_id),
        )
        .with_details(ErrorDetails::new().with_group(group_id))
    }

    /// A member declared a sequence outside `1..=group_size`.
    pub fn sequence_out_of_range(group_id: impl Into<String>, sequence: u32, group_size: usize) -> Self {
        let group_id = group_id.into();
        Self::new(
            ErrorCode::SequenceOutOfRange,
            format!(
                "Correlation sequence {} is outside declared group size {} for group {}",
                sequence, group_size, group_id
            ),
        )
        .with_details(
            ErrorDetails::new()
                .with_group(group_id)
                .with_context("sequence", sequence)
                .with_context("group_size", group_size),
        )
    }

    /// A group expired before its completion policy fired.
    pub fn correlation_timeout(group_id: impl Into<String>, received: usize, expected: Option<usize>) -> Self {
        let group_id = group_id.into();
        let expected_label = expected.map_or_else(|| "unknown".to_string(), |n| n.to_string());
        Self::new(
            ErrorCode::CorrelationTimeout,
            format!(
                "Correlation timed out for group {}: received {} of {} events",
                group_id, received, expected_label
            ),
        )
        .with_details(
            ErrorDetails::new()
                .with_group(group_id)
                .with_context("received", received)
                .with_context("expected", expected),
        )
    }

    /// The caller-supplied merge strategy failed. The group has been removed.
    pub fn aggregation_failed(group_id: impl Into<String>, source: BoxError) -> Self {
        let group_id = group_id.into();
        let mut error = Self::with_internal(
            ErrorCode::AggregationFailed,
            format!("Aggregation failed for group {}", group_id),
            source.to_string(),
        )
        .with_details(ErrorDetails::new().with_group(group_id));
        error.source = Some(source);
        error
    }

    /// The downstream sink rejected a delivery.
    pub fn delivery_failed(source: BoxError) -> Self {
        let mut error = Self::with_internal(
            ErrorCode::DeliveryFailed,
            "Downstream delivery failed",
            source.to_string(),
        );
        error.source = Some(source);
        error
    }

    /// The transport gives the idempotent filter nothing to key on.
    pub fn filter_misconfigured(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::FilterMisconfigured, reason.into()).with_details(
            ErrorDetails::new()
                .with_suggestion("Use a transport that supports unique ids or the secure-hash extractor"),
        )
    }

    /// A unique id that cannot be recorded in the line-oriented store.
    pub fn invalid_unique_id(id: &str) -> Self {
        Self::new(
            ErrorCode::InvalidUniqueId,
            "Unique id must be non-empty and must not contain line breaks",
        )
        .with_context("unique_id", id)
    }

    /// An I/O failure in the idempotent id store.
    pub fn store_io(path: &Path, source: std::io::Error) -> Self {
        Self::with_internal(
            ErrorCode::StoreIoError,
            format!("Idempotent store I/O failed: {}", path.display()),
            source.to_string(),
        )
        .with_context("path", path.display().to_string())
        .with_source(source)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the caller-facing message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Group id this error relates to, if any.
    pub fn group_id(&self) -> Option<&str> {
        self.details.group_id.as_deref()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    group_id = ?self.details.group_id,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "Correlation error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    group_id = ?self.details.group_id,
                    message = %self.message,
                    "Correlation error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Correlation error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "correlator_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<std::io::Error> for CorrelationError {
    fn from(error: std::io::Error) -> Self {
        Self::with_internal(ErrorCode::StoreIoError, "An I/O error occurred", error.to_string())
            .with_source(error)
    }
}

impl From<serde_json::Error> for CorrelationError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string()).with_source(error)
    }
}

impl From<config::ConfigError> for CorrelationError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Failed to load configuration",
            error.to_string(),
        )
        .with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::GroupAlreadyDrained.category(), "correlation");
        assert_eq!(ErrorCode::AggregationFailed.category(), "routing");
        assert_eq!(ErrorCode::FilterMisconfigured.category(), "admission");
        assert_eq!(ErrorCode::StoreIoError.category(), "storage");
        assert_eq!(ErrorCode::InvalidConfiguration.category(), "configuration");
    }

    #[test]
    fn test_routing_errors() {
        assert!(ErrorCode::AggregationFailed.is_routing_error());
        assert!(ErrorCode::DeliveryFailed.is_routing_error());
        assert!(!ErrorCode::FilterMisconfigured.is_routing_error());
        assert!(!ErrorCode::SequenceOutOfRange.is_routing_error());
    }

    #[test]
    fn test_aggregation_failed_keeps_source() {
        let source: BoxError = "payload was not a string".into();
        let error = CorrelationError::aggregation_failed("x", source);

        assert_eq!(error.code(), ErrorCode::AggregationFailed);
        assert_eq!(error.group_id(), Some("x"));
        assert!(std::error::Error::source(&error).is_some());
        assert_eq!(error.internal_message(), Some("payload was not a string"));
    }

    #[test]
    fn test_sequence_out_of_range_details() {
        let error = CorrelationError::sequence_out_of_range("order-1", 4, 3);
        assert_eq!(error.code(), ErrorCode::SequenceOutOfRange);
        assert_eq!(error.details().context["sequence"], serde_json::json!(4));
        assert_eq!(error.details().context["group_size"], serde_json::json!(3));
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::SequenceOutOfRange),
            ErrorSeverity::Low
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::AggregationFailed),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::FilterMisconfigured),
            ErrorSeverity::High
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::InternalError),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_error_display() {
        let error = CorrelationError::with_internal(
            ErrorCode::StoreIoError,
            "Idempotent store I/O failed",
            "permission denied",
        );

        let display = format!("{}", error);
        assert!(display.contains("StoreIoError"));
        assert!(display.contains("Idempotent store I/O failed"));
        assert!(display.contains("permission denied"));
    }

    #[test]
    fn test_details_serialization_skips_empty() {
        let details = ErrorDetails::new().with_group("g");
        let json = serde_json::to_string(&details).unwrap();
        assert!(json.contains("\"group_id\":\"g\""));
        assert!(!json.contains("context"));
        assert!(!json.contains("suggested_action"));
    }
}
