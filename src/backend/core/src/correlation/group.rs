//! Thread-safe accumulator of events sharing one correlation id.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::error::{CorrelationError, Result};
use crate::events::{Event, EventId, GroupId};

/// Mutable part of a group, guarded by one lock.
#[derive(Debug)]
struct GroupState<P> {
    /// Members in arrival order
    events: Vec<Event<P>>,
    /// Set once the group has been claimed from the registry
    sealed: bool,
}

/// A group of events sharing one correlation id.
///
/// Members are kept in arrival order. The expected size is fixed from the
/// first member's declared group size. Once the registry hands the group to a
/// drainer it is sealed and rejects further appends.
#[derive(Debug)]
pub struct EventGroup<P> {
    group_id: GroupId,
    expected_size: Option<usize>,
    created_at: DateTime<Utc>,
    created: Instant,
    state: Mutex<GroupState<P>>,
}

impl<P> EventGroup<P> {
    /// Create an empty group.
    pub fn new(group_id: GroupId, expected_size: Option<usize>) -> Self {
        Self {
            group_id,
            expected_size,
            created_at: Utc::now(),
            created: Instant::now(),
            state: Mutex::new(GroupState {
                events: Vec::new(),
                sealed: false,
            }),
        }
    }

    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    /// Declared number of members, if the first member declared one.
    pub fn expected_size(&self) -> Option<usize> {
        self.expected_size
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time since the group was opened.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Append a member. Returns the group size after the append.
    pub fn add_event(&self, event: Event<P>) -> Result<usize> {
        let mut state = self.state.lock();
        if state.sealed {
            return Err(CorrelationError::group_drained(self.group_id.as_str()));
        }
        state.events.push(event);
        Ok(state.events.len())
    }

    /// Discard a member. Only used on error paths.
    pub fn remove_event(&self, id: &EventId) -> Option<Event<P>> {
        let mut state = self.state.lock();
        let position = state.events.iter().position(|e| e.id() == *id)?;
        Some(state.events.remove(position))
    }

    pub fn size(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether the group has been claimed for draining.
    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed
    }

    pub(crate) fn seal(&self) {
        self.state.lock().sealed = true;
    }

    /// Move the members out of a sealed group.
    ///
    /// Only the claimant calls this; nothing can append to a sealed group, so
    /// the members are handed over without copying.
    pub(crate) fn drain(&self) -> GroupSnapshot<P> {
        let mut state = self.state.lock();
        state.sealed = true;
        GroupSnapshot {
            group_id: self.group_id.clone(),
            expected_size: self.expected_size,
            created_at: self.created_at,
            events: std::mem::take(&mut state.events),
        }
    }
}

impl<P: Clone> EventGroup<P> {
    /// Immutable copy of the group. Never a live view.
    pub fn snapshot(&self) -> GroupSnapshot<P> {
        let state = self.state.lock();
        GroupSnapshot {
            group_id: self.group_id.clone(),
            expected_size: self.expected_size,
            created_at: self.created_at,
            events: state.events.clone(),
        }
    }
}

/// Owned, immutable view of a group's members.
#[derive(Debug, Clone)]
pub struct GroupSnapshot<P> {
    group_id: GroupId,
    expected_size: Option<usize>,
    created_at: DateTime<Utc>,
    events: Vec<Event<P>>,
}

impl<P> GroupSnapshot<P> {
    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    pub fn expected_size(&self) -> Option<usize> {
        self.expected_size
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Members in arrival order.
    pub fn events(&self) -> &[Event<P>] {
        &self.events
    }

    /// Payloads in arrival order.
    pub fn payloads(&self) -> impl Iterator<Item = &P> {
        self.events.iter().map(Event::payload)
    }

    pub fn into_events(self) -> Vec<Event<P>> {
        self.events
    }
}
