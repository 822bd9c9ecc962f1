//! Concurrent map from correlation id to its event group.
//!
//! The registry keeps exactly one live `EventGroup` per group id. Every append
//! goes through a dashmap entry, so lookup-or-create plus append is a single
//! critical section per key, while different keys only share a shard lock.
//!
//! Removal is the claim: the caller whose remove succeeds is the only one
//! allowed to drain the group. Removed groups are sealed before they leave
//! the map and can never be appended to again.
//!
//! When a [`ProcessedGroups`] guard is passed in, it is checked before a
//! group opens and updated before a claimed group leaves the map, both under
//! the same entry lock, so a late member can never slip into a fresh group
//! between a drain and its record.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use super::group::EventGroup;
use super::policy::CompletionPolicy;
use super::processed::ProcessedGroups;
use crate::error::{CorrelationError, Result};
use crate::events::{Event, GroupId};

/// Outcome of offering an event to the registry with a completion policy.
#[derive(Debug)]
pub enum Admission<P> {
    /// The event was appended and the group is still collecting.
    Pending {
        group: Arc<EventGroup<P>>,
        /// Whether this event opened the group
        opened: bool,
    },
    /// The event completed the group, and this caller claimed it.
    Complete {
        group: Arc<EventGroup<P>>,
        /// Whether the group was visible in the map before completing
        published: bool,
    },
    /// The event was dropped: its group id was drained recently.
    LateArrival,
}

/// Registry of in-flight event groups.
#[derive(Debug)]
pub struct GroupRegistry<P> {
    groups: DashMap<GroupId, Arc<EventGroup<P>>>,
}

impl<P> Default for GroupRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> GroupRegistry<P> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
        }
    }

    /// Create an empty registry with a fixed shard amount.
    ///
    /// `shard_amount` must be a power of two greater than one.
    pub fn with_shard_amount(shard_amount: usize) -> Result<Self> {
        if shard_amount < 2 || !shard_amount.is_power_of_two() {
            return Err(CorrelationError::configuration(format!(
                "shard amount must be a power of two greater than 1, got {}",
                shard_amount
            )));
        }
        Ok(Self {
            groups: DashMap::with_shard_amount(shard_amount),
        })
    }

    /// Append an event to its group, creating the group on first arrival.
    ///
    /// Completion is not evaluated here; callers that need the atomic
    /// append-check-claim step use [`GroupRegistry::add_and_claim`].
    pub fn add_event(&self, group_id: &GroupId, event: Event<P>) -> Result<Arc<EventGroup<P>>> {
        match self.groups.entry(group_id.clone()) {
            Entry::Occupied(entry) => {
                let group = Arc::clone(entry.get());
                check_sequence(group_id, &event, group.expected_size())?;
                group.add_event(event)?;
                Ok(group)
            }
            Entry::Vacant(entry) => {
                check_sequence(group_id, &event, event.correlation_group_size())?;
                let group = Arc::new(EventGroup::new(group_id.clone(), event.correlation_group_size()));
                group.add_event(event)?;
                entry.insert(Arc::clone(&group));
                debug!(group_id = %group_id, "Opened event group");
                Ok(group)
            }
        }
    }

    /// Append an event, evaluate `policy` on the post-append state and, when
    /// complete, remove and seal the group, all under the key's entry lock.
    ///
    /// At most one caller ever receives [`Admission::Complete`] for a given
    /// group instance. `policy` runs while the entry lock is held; see
    /// [`CompletionPolicy`] for what it must not do.
    pub fn add_and_claim(
        &self,
        group_id: &GroupId,
        event: Event<P>,
        policy: &dyn CompletionPolicy<P>,
    ) -> Result<Admission<P>> {
        self.add_and_claim_guarded(group_id, event, policy, None)
    }

    /// [`GroupRegistry::add_and_claim`] with a late-arrival guard.
    ///
    /// An event that would open a group whose id is in `processed` is
    /// dropped as [`Admission::LateArrival`]. A completed group's id is
    /// recorded in `processed` before the entry lock is released.
    pub fn add_and_claim_guarded(
        &self,
        group_id: &GroupId,
        event: Event<P>,
        policy: &dyn CompletionPolicy<P>,
        processed: Option<&ProcessedGroups>,
    ) -> Result<Admission<P>> {
        match self.groups.entry(group_id.clone()) {
            Entry::Occupied(entry) => {
                let group = Arc::clone(entry.get());
                check_sequence(group_id, &event, group.expected_size())?;
                let size = group.add_event(event)?;
                trace!(group_id = %group_id, size = size, expected = ?group.expected_size(), "Appended to event group");

                if policy.is_complete(&group) {
                    if let Some(processed) = processed {
                        processed.record(group_id);
                    }
                    group.seal();
                    entry.remove();
                    return Ok(Admission::Complete { group, published: true });
                }
                Ok(Admission::Pending { group, opened: false })
            }
            Entry::Vacant(entry) => {
                if processed.is_some_and(|processed| processed.contains(group_id)) {
                    return Ok(Admission::LateArrival);
                }
                check_sequence(group_id, &event, event.correlation_group_size())?;
                let group = Arc::new(EventGroup::new(group_id.clone(), event.correlation_group_size()));
                group.add_event(event)?;

                if policy.is_complete(&group) {
                    // Single-member group: never published.
                    if let Some(processed) = processed {
                        processed.record(group_id);
                    }
                    group.seal();
                    return Ok(Admission::Complete { group, published: false });
                }
                entry.insert(Arc::clone(&group));
                debug!(group_id = %group_id, expected = ?group.expected_size(), "Opened event group");
                Ok(Admission::Pending { group, opened: true })
            }
        }
    }

    /// Remove and seal the group for `group_id`.
    ///
    /// Returns `None` when the group was already removed; that caller must
    /// not drain.
    pub fn remove(&self, group_id: &GroupId) -> Option<Arc<EventGroup<P>>> {
        self.groups
            .remove_if(group_id, |_, group| {
                group.seal();
                true
            })
            .map(|(_, group)| group)
    }

    /// Remove `group` only if the registry still maps its id to this exact
    /// instance. Exactly one concurrent claimant succeeds; a group opened
    /// later under a reused id is left untouched.
    pub fn claim(&self, group: &Arc<EventGroup<P>>) -> bool {
        self.claim_guarded(group, None)
    }

    /// [`GroupRegistry::claim`] that records the claimed id in `processed`
    /// before the entry lock is released.
    pub fn claim_guarded(&self, group: &Arc<EventGroup<P>>, processed: Option<&ProcessedGroups>) -> bool {
        self.groups
            .remove_if(group.group_id(), |id, current| {
                if !Arc::ptr_eq(current, group) {
                    return false;
                }
                if let Some(processed) = processed {
                    processed.record(id);
                }
                current.seal();
                true
            })
            .is_some()
    }

    /// Current group for `group_id`, if any.
    pub fn get(&self, group_id: &GroupId) -> Option<Arc<EventGroup<P>>> {
        self.groups.get(group_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, group_id: &GroupId) -> bool {
        self.groups.contains_key(group_id)
    }

    /// Number of in-flight groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Ids of all in-flight groups.
    pub fn group_ids(&self) -> Vec<GroupId> {
        self.groups.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Handles to all in-flight groups.
    pub fn groups(&self) -> Vec<Arc<EventGroup<P>>> {
        self.groups.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}

/// Reject members whose sequence falls outside `1..=size`.
fn check_sequence<P>(group_id: &GroupId, event: &Event<P>, size: Option<usize>) -> Result<()> {
    match (event.correlation_sequence(), size) {
        (Some(sequence), Some(size)) if sequence == 0 || sequence as usize > size => Err(
            CorrelationError::sequence_out_of_range(group_id.as_str(), sequence, size),
        ),
        _ => Ok(()),
    }
}
