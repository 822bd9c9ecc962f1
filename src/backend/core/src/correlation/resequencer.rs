//! Resequencer: releases every completed group as an ordered list.

use std::time::Instant;
use tracing::{debug, instrument, warn};

use super::correlator::{Correlator, Offer, SweepReport};
use super::group::GroupSnapshot;
use super::policy::{by_correlation_sequence, Comparator};
use crate::error::Result;
use crate::events::Event;
use crate::telemetry::CorrelationMetrics;

const STAGE: &str = "resequencer";

/// Collects correlated events and emits each completed group in order.
pub struct Resequencer<P> {
    correlator: Correlator<P>,
    comparator: Option<Comparator<P>>,
}

impl<P: Send + Sync + 'static> Resequencer<P> {
    /// Create a resequencer over `correlator`.
    ///
    /// Without a comparator, drained groups keep arrival order.
    pub fn new(mut correlator: Correlator<P>, comparator: Option<Comparator<P>>) -> Self {
        correlator.set_stage(STAGE);
        if comparator.is_none() {
            warn!(stage = STAGE, "Resequencer has no comparator; groups will be released in arrival order");
        }
        Self {
            correlator,
            comparator,
        }
    }

    /// Resequencer ordering by correlation sequence, default correlator.
    pub fn by_sequence() -> Self {
        Self::new(Correlator::default(), Some(by_correlation_sequence()))
    }

    /// Resequencer that releases groups unsorted.
    pub fn unordered() -> Self {
        Self::new(Correlator::default(), None)
    }

    pub fn correlator(&self) -> &Correlator<P> {
        &self.correlator
    }

    pub fn is_ordered(&self) -> bool {
        self.comparator.is_some()
    }

    /// Admit one event.
    ///
    /// Returns an empty list while its group is collecting, and the whole
    /// group in comparator order for the call whose event completed it.
    #[instrument(skip(self, event), fields(event_id = %event.id()))]
    pub fn process(&self, event: Event<P>) -> Result<Vec<Event<P>>> {
        match self.correlator.offer(event)? {
            Offer::Pending(_) | Offer::LateArrival(_) => Ok(Vec::new()),
            Offer::Complete(snapshot) => Ok(self.order(snapshot)),
        }
    }

    /// Claim expired groups. Partial groups are released sorted when the
    /// correlator forwards timeouts, otherwise each is reported as a
    /// timeout error.
    pub fn sweep_expired(&self) -> SweepReport<Vec<Event<P>>> {
        let mut report = SweepReport::default();
        for snapshot in self.correlator.sweep_expired() {
            if self.correlator.fail_on_timeout() {
                report.errors.push(self.correlator.timeout_error(&snapshot));
            } else {
                report.emitted.push(self.order(snapshot));
            }
        }
        report
    }

    fn order(&self, snapshot: GroupSnapshot<P>) -> Vec<Event<P>> {
        let start = Instant::now();
        let group_id = snapshot.group_id().clone();
        let mut events = snapshot.into_events();

        match &self.comparator {
            // stable: equal keys keep arrival order
            Some(comparator) => events.sort_by(|a, b| comparator(a, b)),
            None => {
                warn!(
                    stage = STAGE,
                    group_id = %group_id,
                    "Releasing event group without a comparator"
                );
                CorrelationMetrics::unsorted_drain();
            }
        }

        CorrelationMetrics::group_completed(STAGE, events.len(), start.elapsed());
        debug!(group_id = %group_id, size = events.len(), "Event group resequenced");
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::policy::ExpectedSize;
    use std::cmp::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    fn sequences(events: &[Event<&'static str>]) -> Vec<Option<u32>> {
        events.iter().map(|e| e.correlation_sequence()).collect()
    }

    #[test]
    fn test_releases_sorted_group() {
        let resequencer = Resequencer::by_sequence();

        assert!(resequencer.process(Event::new("c").with_correlation("g", 3, 3)).unwrap().is_empty());
        assert!(resequencer.process(Event::new("a").with_correlation("g", 1, 3)).unwrap().is_empty());
        let released = resequencer.process(Event::new("b").with_correlation("g", 2, 3)).unwrap();

        assert_eq!(sequences(&released), vec![Some(1), Some(2), Some(3)]);
        assert!(resequencer.correlator().registry().is_empty());
    }

    #[test]
    fn test_unordered_keeps_arrival_order() {
        let resequencer = Resequencer::unordered();
        assert!(!resequencer.is_ordered());

        resequencer.process(Event::new("b").with_correlation("g", 2, 2)).unwrap();
        let released = resequencer.process(Event::new("a").with_correlation("g", 1, 2)).unwrap();
        assert_eq!(sequences(&released), vec![Some(2), Some(1)]);
    }

    #[test]
    fn test_custom_comparator_is_stable() {
        let by_payload_len: Comparator<&'static str> =
            Arc::new(|a: &Event<&'static str>, b: &Event<&'static str>| -> Ordering {
                a.payload().len().cmp(&b.payload().len())
            });
        let resequencer = Resequencer::new(Correlator::new(ExpectedSize), Some(by_payload_len));

        resequencer.process(Event::new("xx").with_correlation("g", 1, 3)).unwrap();
        resequencer.process(Event::new("y").with_correlation("g", 2, 3)).unwrap();
        let released = resequencer.process(Event::new("z").with_correlation("g", 3, 3)).unwrap();

        let payloads: Vec<_> = released.iter().map(|e| *e.payload()).collect();
        assert_eq!(payloads, vec!["y", "z", "xx"]);
    }

    #[test]
    fn test_sweep_forwards_sorted_partial() {
        let correlator = Correlator::new(ExpectedSize)
            .with_timeout(Duration::from_millis(5))
            .with_fail_on_timeout(false);
        let resequencer = Resequencer::new(correlator, Some(by_correlation_sequence()));

        resequencer.process(Event::new("c").with_correlation("g", 3, 4)).unwrap();
        resequencer.process(Event::new("a").with_correlation("g", 1, 4)).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let report = resequencer.sweep_expired();
        assert!(report.errors.is_empty());
        assert_eq!(report.emitted.len(), 1);
        assert_eq!(sequences(&report.emitted[0]), vec![Some(1), Some(3)]);
    }
}
