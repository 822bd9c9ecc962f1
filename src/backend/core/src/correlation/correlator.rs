//! Admission and claim core shared by the aggregator and the resequencer.
//!
//! A `Correlator` owns one registry (one correlation domain). It resolves
//! each event's group id, screens late arrivals, appends through the
//! registry's atomic append-check-claim step and hands completed groups to
//! its caller as owned snapshots. It owns no threads: expiry happens only
//! when the caller sweeps.

use std::time::Duration;
use tracing::{debug, warn};

use super::group::{EventGroup, GroupSnapshot};
use super::policy::{CompletionPolicy, ExpectedSize};
use super::processed::ProcessedGroups;
use super::registry::{Admission, GroupRegistry};
use crate::config::CorrelationConfig;
use crate::error::{CorrelationError, Result};
use crate::events::{Event, GroupId, NO_CORRELATION_ID};
use crate::telemetry::CorrelationMetrics;

/// Outcome of offering one event to a correlator.
#[derive(Debug)]
pub enum Offer<P> {
    /// Appended; the group is still collecting.
    Pending(GroupId),
    /// This event completed its group and this caller owns the drain.
    Complete(GroupSnapshot<P>),
    /// Dropped: the group was drained recently.
    LateArrival(GroupId),
}

/// Result of an expiry sweep over one stage.
#[derive(Debug)]
pub struct SweepReport<T> {
    /// Partial results forwarded downstream
    pub emitted: Vec<T>,
    /// Expired or failed groups
    pub errors: Vec<CorrelationError>,
}

impl<T> Default for SweepReport<T> {
    fn default() -> Self {
        Self {
            emitted: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<T> SweepReport<T> {
    pub fn is_empty(&self) -> bool {
        self.emitted.is_empty() && self.errors.is_empty()
    }
}

/// Shared grouping core.
pub struct Correlator<P> {
    stage: &'static str,
    registry: GroupRegistry<P>,
    policy: Box<dyn CompletionPolicy<P>>,
    processed: ProcessedGroups,
    no_correlation_id: String,
    timeout: Option<Duration>,
    fail_on_timeout: bool,
}

impl<P: Send + Sync + 'static> Default for Correlator<P> {
    fn default() -> Self {
        Self::new(ExpectedSize)
    }
}

impl<P: Send + Sync + 'static> Correlator<P> {
    /// Create a correlator with the given completion policy and default
    /// settings: no timeout, late-arrival guard off, `"no-id"` sentinel.
    pub fn new(policy: impl CompletionPolicy<P> + 'static) -> Self {
        Self {
            stage: "correlator",
            registry: GroupRegistry::new(),
            policy: Box::new(policy),
            processed: ProcessedGroups::new(0),
            no_correlation_id: NO_CORRELATION_ID.to_string(),
            timeout: None,
            fail_on_timeout: true,
        }
    }

    /// Create a correlator from configuration.
    pub fn from_config(
        config: &CorrelationConfig,
        policy: impl CompletionPolicy<P> + 'static,
    ) -> Result<Self> {
        let registry = match config.shard_amount {
            Some(shards) => GroupRegistry::with_shard_amount(shards)?,
            None => GroupRegistry::new(),
        };
        Ok(Self {
            stage: "correlator",
            registry,
            policy: Box::new(policy),
            processed: ProcessedGroups::new(config.processed_group_capacity),
            no_correlation_id: config.no_correlation_id.clone(),
            timeout: config.timeout,
            fail_on_timeout: config.fail_on_timeout,
        })
    }

    /// Claim groups older than `timeout` on the next sweep.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether swept groups are reported as failures (`true`) or forwarded
    /// partially (`false`).
    pub fn with_fail_on_timeout(mut self, fail: bool) -> Self {
        self.fail_on_timeout = fail;
        self
    }

    /// Remember the last `capacity` drained group ids and drop late arrivals
    /// for them.
    pub fn with_processed_capacity(mut self, capacity: usize) -> Self {
        self.processed = ProcessedGroups::new(capacity);
        self
    }

    /// Group id used for events without a correlation id.
    pub fn with_no_correlation_id(mut self, sentinel: impl Into<String>) -> Self {
        self.no_correlation_id = sentinel.into();
        self
    }

    pub(crate) fn set_stage(&mut self, stage: &'static str) {
        self.stage = stage;
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn registry(&self) -> &GroupRegistry<P> {
        &self.registry
    }

    pub fn fail_on_timeout(&self) -> bool {
        self.fail_on_timeout
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Group id an event will be filed under.
    pub fn group_id_for(&self, event: &Event<P>) -> GroupId {
        event.group_id(&self.no_correlation_id)
    }

    /// Offer one event.
    ///
    /// Append, completion check and claim happen as one step per group id.
    /// At most one call ever returns [`Offer::Complete`] for a group.
    pub fn offer(&self, event: Event<P>) -> Result<Offer<P>> {
        CorrelationMetrics::event_received(self.stage);
        let group_id = self.group_id_for(&event);
        let event_id = event.id();

        let admission = self.registry.add_and_claim_guarded(
            &group_id,
            event,
            self.policy.as_ref(),
            self.guard_for(&group_id),
        )?;

        match admission {
            Admission::Pending { group, opened } => {
                if opened {
                    self.on_group_opened(&group);
                }
                Ok(Offer::Pending(group_id))
            }
            Admission::Complete { group, published } => {
                if published {
                    CorrelationMetrics::group_closed(self.stage);
                }
                debug!(
                    stage = self.stage,
                    group_id = %group_id,
                    size = group.size(),
                    "Event group complete"
                );
                Ok(Offer::Complete(group.drain()))
            }
            Admission::LateArrival => {
                debug!(
                    stage = self.stage,
                    group_id = %group_id,
                    event_id = %event_id,
                    "Event received for an already drained group, dropping"
                );
                CorrelationMetrics::late_arrival(self.stage);
                Ok(Offer::LateArrival(group_id))
            }
        }
    }

    /// Claim every group older than the configured timeout.
    ///
    /// Each group is claimed with compare-and-remove, so a group that
    /// completes concurrently is drained by exactly one side.
    pub fn sweep_expired(&self) -> Vec<GroupSnapshot<P>> {
        let Some(timeout) = self.timeout else {
            return Vec::new();
        };

        let mut expired = Vec::new();
        for group in self.registry.groups() {
            if group.age() < timeout {
                continue;
            }
            if self.registry.claim_guarded(&group, self.guard_for(group.group_id())) {
                debug!(
                    stage = self.stage,
                    group_id = %group.group_id(),
                    size = group.size(),
                    expected = ?group.expected_size(),
                    "Event group expired"
                );
                CorrelationMetrics::group_closed(self.stage);
                CorrelationMetrics::group_expired(self.stage, !self.fail_on_timeout);
                expired.push(group.drain());
            }
        }
        expired
    }

    /// Report for a group claimed by a sweep when timeouts are failures.
    pub(crate) fn timeout_error(&self, snapshot: &GroupSnapshot<P>) -> CorrelationError {
        let err = CorrelationError::correlation_timeout(
            snapshot.group_id().as_str(),
            snapshot.len(),
            snapshot.expected_size(),
        );
        err.log();
        err
    }

    fn on_group_opened(&self, group: &EventGroup<P>) {
        CorrelationMetrics::group_opened(self.stage);
        if self.policy.requires_declared_size() && group.expected_size().is_none() {
            warn!(
                stage = self.stage,
                group_id = %group.group_id(),
                "Event group opened without a declared size; the size-based completion policy will never fire for it"
            );
            CorrelationMetrics::unbounded_group(self.stage);
        }
    }

    /// Late-arrival guard for `group_id`. The no-correlation-id group is
    /// exempt: uncorrelated events always start a fresh group.
    fn guard_for(&self, group_id: &GroupId) -> Option<&ProcessedGroups> {
        (group_id.as_str() != self.no_correlation_id).then_some(&self.processed)
    }
}
