//! Correlation engine.
//!
//! Events sharing a correlation id are collected into an [`EventGroup`] held
//! by the [`GroupRegistry`]. When a [`CompletionPolicy`] says a group is
//! done, exactly one caller claims it and hands it to a consumer:
//!
//! - [`Aggregator`] merges the members into one event
//! - [`Resequencer`] releases the members ordered by a [`Comparator`]
//!
//! Both consumers share the [`Correlator`] core, which also carries the
//! optional late-arrival guard ([`ProcessedGroups`]) and caller-driven
//! expiry sweeps.

pub mod aggregator;
pub mod correlator;
pub mod group;
pub mod policy;
pub mod processed;
pub mod registry;
pub mod resequencer;

pub use aggregator::{AggregationStrategy, Aggregator};
pub use correlator::{Correlator, Offer, SweepReport};
pub use group::{EventGroup, GroupSnapshot};
pub use policy::{by_correlation_sequence, Comparator, CompletionPolicy, ExpectedSize, FixedCount};
pub use processed::ProcessedGroups;
pub use registry::{Admission, GroupRegistry};
pub use resequencer::Resequencer;
