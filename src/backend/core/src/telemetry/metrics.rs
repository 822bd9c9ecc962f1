//! Metrics for the correlation engine.
//!
//! All recording goes through the `metrics` facade. The library installs no
//! recorder; without one every call is a no-op. Embedders that export metrics
//! install a recorder and call [`register_metric_descriptions`] once.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Register all metric descriptions.
pub fn register_metric_descriptions() {
    describe_counter!("correlator_events_total", "Events offered to a correlation stage");
    describe_counter!("correlator_groups_opened_total", "Event groups opened");
    describe_counter!("correlator_groups_completed_total", "Event groups drained on completion");
    describe_counter!("correlator_groups_expired_total", "Event groups claimed by an expiry sweep");
    describe_histogram!(
        "correlator_group_size",
        "Number of members in a drained event group"
    );
    describe_histogram!(
        "correlator_drain_duration_seconds",
        "Time spent merging or sorting a drained group"
    );
    describe_gauge!(
        "correlator_groups_in_flight",
        "Event groups currently collecting, summed over every correlator of a stage"
    );

    describe_counter!(
        "correlator_late_arrivals_total",
        "Events dropped because their group was already drained"
    );
    describe_counter!(
        "correlator_groups_unbounded_total",
        "Groups opened without a declared size under a size-based policy"
    );
    describe_counter!(
        "correlator_unsorted_drains_total",
        "Resequencer drains performed without a comparator"
    );

    describe_counter!("correlator_ids_accepted_total", "Unique ids accepted by the idempotent filter");
    describe_counter!(
        "correlator_duplicates_rejected_total",
        "Events rejected by the idempotent filter as already seen"
    );

    describe_counter!("correlator_errors_total", "Errors by code");
}

/// Metrics for one correlation stage (aggregator or resequencer).
pub struct CorrelationMetrics;

impl CorrelationMetrics {
    /// Record an event offered to a stage.
    pub fn event_received(stage: &'static str) {
        counter!("correlator_events_total", "stage" => stage).increment(1);
    }

    /// Record a newly opened group that is now collecting.
    pub fn group_opened(stage: &'static str) {
        counter!("correlator_groups_opened_total", "stage" => stage).increment(1);
        gauge!("correlator_groups_in_flight", "stage" => stage).increment(1.0);
    }

    /// Record a collecting group leaving the registry.
    pub fn group_closed(stage: &'static str) {
        gauge!("correlator_groups_in_flight", "stage" => stage).decrement(1.0);
    }

    /// Record a completed and drained group.
    pub fn group_completed(stage: &'static str, size: usize, drain_time: Duration) {
        counter!("correlator_groups_completed_total", "stage" => stage).increment(1);
        histogram!("correlator_group_size", "stage" => stage).record(size as f64);
        histogram!("correlator_drain_duration_seconds", "stage" => stage).record(drain_time.as_secs_f64());
    }

    /// Record a group claimed by an expiry sweep.
    pub fn group_expired(stage: &'static str, forwarded: bool) {
        let action = if forwarded { "forward" } else { "fail" };
        counter!("correlator_groups_expired_total", "stage" => stage, "action" => action).increment(1);
    }

    /// Record an event dropped for an already drained group.
    pub fn late_arrival(stage: &'static str) {
        counter!("correlator_late_arrivals_total", "stage" => stage).increment(1);
    }

    /// Record a group that a size-based policy can never complete.
    pub fn unbounded_group(stage: &'static str) {
        counter!("correlator_groups_unbounded_total", "stage" => stage).increment(1);
    }

    /// Record a resequencer drain without a comparator.
    pub fn unsorted_drain() {
        counter!("correlator_unsorted_drains_total").increment(1);
    }
}

/// Metrics for the idempotent admission filter.
pub struct AdmissionMetrics;

impl AdmissionMetrics {
    /// Record a newly accepted unique id.
    pub fn accepted(consumer: &str) {
        counter!("correlator_ids_accepted_total", "consumer" => consumer.to_string()).increment(1);
    }

    /// Record a rejected duplicate.
    pub fn duplicate(consumer: &str) {
        counter!("correlator_duplicates_rejected_total", "consumer" => consumer.to_string()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        register_metric_descriptions();
        CorrelationMetrics::event_received("aggregator");
        CorrelationMetrics::group_completed("aggregator", 3, Duration::from_millis(2));
        CorrelationMetrics::group_opened("resequencer");
        CorrelationMetrics::group_closed("resequencer");
        AdmissionMetrics::duplicate("orders");
    }
}
