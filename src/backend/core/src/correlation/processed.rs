//! Bounded memory of recently drained group ids.
//!
//! When enabled, members that arrive for a group that has already been
//! drained are dropped instead of opening a fresh group under the same id.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

use crate::events::GroupId;

#[derive(Debug, Default)]
struct Recent {
    order: VecDeque<GroupId>,
    members: HashSet<GroupId>,
}

/// FIFO set of the last `capacity` drained group ids.
///
/// A capacity of zero disables the guard entirely.
#[derive(Debug)]
pub struct ProcessedGroups {
    capacity: usize,
    recent: Mutex<Recent>,
}

impl ProcessedGroups {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            recent: Mutex::new(Recent::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Record a drained group, evicting the oldest entry when full.
    pub fn record(&self, group_id: &GroupId) {
        if !self.is_enabled() {
            return;
        }
        let mut recent = self.recent.lock();
        if !recent.members.insert(group_id.clone()) {
            return;
        }
        recent.order.push_back(group_id.clone());
        while recent.order.len() > self.capacity {
            if let Some(evicted) = recent.order.pop_front() {
                recent.members.remove(&evicted);
            }
        }
    }

    /// Whether `group_id` was drained recently.
    pub fn contains(&self, group_id: &GroupId) -> bool {
        self.is_enabled() && self.recent.lock().members.contains(group_id)
    }

    pub fn len(&self) -> usize {
        self.recent.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
