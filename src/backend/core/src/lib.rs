#![allow(clippy::result_large_err)]
//! # Correlator Core
//!
//! Correlation-based event grouping for message pipelines.
//!
//! ## Architecture
//!
//! - **Events**: Payload plus correlation metadata (id, 1-based sequence, group size)
//! - **Registry**: Concurrent map of in-flight groups with exactly-once claims
//! - **Aggregator**: Merges each completed group into one event
//! - **Resequencer**: Releases each completed group in comparator order
//! - **Idempotent**: Per-consumer duplicate suppression backed by a durable id log
//! - **Pipeline**: Filter, stage and sink wired together
//! - **Telemetry**: Structured logging and metrics
//!
//! ## Example
//!
//! ```rust
//! use correlator_core::prelude::*;
//!
//! let aggregator = Aggregator::with_strategy(|group: &GroupSnapshot<String>| -> std::result::Result<Event<String>, BoxError> {
//!     let joined = group.payloads().cloned().collect::<Vec<_>>().join(" ");
//!     Ok(Event::merged(group.group_id(), joined))
//! });
//!
//! assert!(aggregator.process(Event::new("hello".to_string()).with_correlation("g", 1, 2)).unwrap().is_none());
//! let merged = aggregator.process(Event::new("world".to_string()).with_correlation("g", 2, 2)).unwrap();
//! assert_eq!(merged.unwrap().payload(), "hello world");
//! ```

pub mod config;
pub mod correlation;
pub mod error;
pub mod events;
pub mod idempotent;
pub mod pipeline;
pub mod telemetry;

pub use error::{BoxError, CorrelationError, ErrorCode, ErrorDetails, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, CorrelationConfig, IdSource, IdempotentConfig};
    pub use crate::correlation::{
        by_correlation_sequence, AggregationStrategy, Aggregator, Comparator, CompletionPolicy,
        Correlator, EventGroup, ExpectedSize, FixedCount, GroupRegistry, GroupSnapshot, Offer,
        Resequencer, SweepReport,
    };
    pub use crate::error::{BoxError, CorrelationError, ErrorCode, ErrorDetails, ErrorSeverity, Result};
    pub use crate::events::{Event, EventId, GroupId, NO_CORRELATION_ID};
    pub use crate::idempotent::{FileStore, IdExtractor, IdempotentFilter, IdempotentStore, InMemoryStore};
    pub use crate::pipeline::{Dispatch, EventSink, MemorySink, Pipeline, Stage};
}
