//! Aggregator: merges every completed group into one output event.

use std::time::Instant;
use tracing::{debug, instrument};

use super::correlator::{Correlator, Offer, SweepReport};
use super::group::GroupSnapshot;
use crate::error::{BoxError, CorrelationError, Result};
use crate::events::Event;
use crate::telemetry::CorrelationMetrics;

const STAGE: &str = "aggregator";

/// Merges the members of a completed group into a single event.
///
/// Members are presented in arrival order. The strategy runs after the
/// group has been claimed, outside every registry lock.
pub trait AggregationStrategy<P>: Send + Sync {
    fn aggregate(&self, group: &GroupSnapshot<P>) -> std::result::Result<Event<P>, BoxError>;
}

impl<P, F> AggregationStrategy<P> for F
where
    F: Fn(&GroupSnapshot<P>) -> std::result::Result<Event<P>, BoxError> + Send + Sync,
{
    fn aggregate(&self, group: &GroupSnapshot<P>) -> std::result::Result<Event<P>, BoxError> {
        self(group)
    }
}

/// Collects correlated events and emits one merged event per group.
pub struct Aggregator<P> {
    correlator: Correlator<P>,
    strategy: Box<dyn AggregationStrategy<P>>,
}

impl<P: Send + Sync + 'static> Aggregator<P> {
    /// Create an aggregator over `correlator`.
    pub fn new(mut correlator: Correlator<P>, strategy: impl AggregationStrategy<P> + 'static) -> Self {
        correlator.set_stage(STAGE);
        Self {
            correlator,
            strategy: Box::new(strategy),
        }
    }

    /// Aggregator with the default correlator (expected-size completion).
    pub fn with_strategy(strategy: impl AggregationStrategy<P> + 'static) -> Self {
        Self::new(Correlator::default(), strategy)
    }

    pub fn correlator(&self) -> &Correlator<P> {
        &self.correlator
    }

    /// Admit one event.
    ///
    /// Returns `Ok(None)` while its group is collecting (or the event was a
    /// late arrival), and the merged event for the one call whose event
    /// completed the group.
    #[instrument(skip(self, event), fields(event_id = %event.id()))]
    pub fn process(&self, event: Event<P>) -> Result<Option<Event<P>>> {
        match self.correlator.offer(event)? {
            Offer::Pending(_) | Offer::LateArrival(_) => Ok(None),
            Offer::Complete(snapshot) => self.merge(&snapshot).map(Some),
        }
    }

    /// Claim expired groups. Partial groups are merged when the correlator
    /// forwards timeouts, otherwise each is reported as a timeout error.
    pub fn sweep_expired(&self) -> SweepReport<Event<P>> {
        let mut report = SweepReport::default();
        for snapshot in self.correlator.sweep_expired() {
            if self.correlator.fail_on_timeout() {
                report.errors.push(self.correlator.timeout_error(&snapshot));
                continue;
            }
            match self.merge(&snapshot) {
                Ok(event) => report.emitted.push(event),
                Err(err) => report.errors.push(err),
            }
        }
        report
    }

    fn merge(&self, snapshot: &GroupSnapshot<P>) -> Result<Event<P>> {
        let start = Instant::now();
        let merged = self.strategy.aggregate(snapshot).map_err(|source| {
            let err = CorrelationError::aggregation_failed(snapshot.group_id().as_str(), source);
            err.log();
            err
        })?;

        CorrelationMetrics::group_completed(STAGE, snapshot.len(), start.elapsed());
        debug!(
            group_id = %snapshot.group_id(),
            size = snapshot.len(),
            "Event group aggregated"
        );
        Ok(merged)
    }
}
