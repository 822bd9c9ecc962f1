//! Completion and ordering policies.
//!
//! Both are injected strategy values: a `CompletionPolicy` decides when a
//! group may be drained, a `Comparator` orders members for the resequencer.
//! Closures implement `CompletionPolicy` directly.

use std::cmp::Ordering;
use std::sync::Arc;

use super::group::EventGroup;
use crate::events::Event;

// =============================================================================
// Completion
// =============================================================================

/// Predicate deciding whether a group is ready to be drained.
///
/// Evaluated after every append, while the registry holds the write lock of
/// the shard that owns the group's id.
///
/// # Deadlocks
///
/// An implementation must not call back into the `GroupRegistry`,
/// `Correlator`, `Aggregator` or `Resequencer` it is installed in, not even
/// to read. Any such call may need the shard lock already held by the
/// evaluating thread and will block forever. Inspect only the group passed
/// in, and keep the check cheap: every other id in the same shard waits on it.
pub trait CompletionPolicy<P>: Send + Sync {
    /// Whether the group, in its post-append state, is complete.
    fn is_complete(&self, group: &EventGroup<P>) -> bool;

    /// Whether this policy can only fire for groups that declared a size.
    fn requires_declared_size(&self) -> bool {
        false
    }
}

/// Complete when the group holds exactly its declared number of members.
///
/// Groups whose first member declared no size never complete under this
/// policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpectedSize;

impl<P> CompletionPolicy<P> for ExpectedSize {
    fn is_complete(&self, group: &EventGroup<P>) -> bool {
        match group.expected_size() {
            Some(expected) => group.size() == expected,
            None => false,
        }
    }

    fn requires_declared_size(&self) -> bool {
        true
    }
}

/// Complete once the group holds at least `n` members, regardless of any
/// declared size.
#[derive(Debug, Clone, Copy)]
pub struct FixedCount(pub usize);

impl<P> CompletionPolicy<P> for FixedCount {
    fn is_complete(&self, group: &EventGroup<P>) -> bool {
        group.size() >= self.0
    }
}

impl<P, F> CompletionPolicy<P> for F
where
    F: Fn(&EventGroup<P>) -> bool + Send + Sync,
{
    fn is_complete(&self, group: &EventGroup<P>) -> bool {
        self(group)
    }
}

// =============================================================================
// Ordering
// =============================================================================

/// Ordering applied to a drained group's members by the resequencer.
pub type Comparator<P> = Arc<dyn Fn(&Event<P>, &Event<P>) -> Ordering + Send + Sync>;

/// Ascending by correlation sequence. Members without a sequence sort first.
pub fn by_correlation_sequence<P: 'static>() -> Comparator<P> {
    Arc::new(|a: &Event<P>, b: &Event<P>| a.correlation_sequence().cmp(&b.correlation_sequence()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::GroupId;

    fn group_with(expected: Option<usize>, members: usize) -> EventGroup<u32> {
        let group = EventGroup::new(GroupId::new("g"), expected);
        for i in 0..members {
            group.add_event(Event::new(i as u32)).unwrap();
        }
        group
    }

    #[test]
    fn test_expected_size_policy() {
        let policy = ExpectedSize;
        assert!(!CompletionPolicy::<u32>::is_complete(&policy, &group_with(Some(3), 2)));
        assert!(CompletionPolicy::<u32>::is_complete(&policy, &group_with(Some(3), 3)));
        assert!(CompletionPolicy::<u32>::requires_declared_size(&policy));
    }

    #[test]
    fn test_expected_size_never_fires_without_declaration() {
        let policy = ExpectedSize;
        for members in 0..10 {
            assert!(!CompletionPolicy::<u32>::is_complete(&policy, &group_with(None, members)));
        }
    }

    #[test]
    fn test_fixed_count_ignores_declared_size() {
        let policy = FixedCount(2);
        assert!(!CompletionPolicy::<u32>::is_complete(&policy, &group_with(None, 1)));
        assert!(CompletionPolicy::<u32>::is_complete(&policy, &group_with(Some(5), 2)));
    }

    #[test]
    fn test_closure_policy() {
        let policy = |g: &EventGroup<u32>| g.snapshot().payloads().any(|p| *p == 2);
        assert!(!policy.is_complete(&group_with(None, 2)));
        assert!(policy.is_complete(&group_with(None, 3)));
        assert!(!CompletionPolicy::<u32>::requires_declared_size(&policy));
    }

    #[test]
    fn test_by_correlation_sequence() {
        let cmp = by_correlation_sequence::<&str>();
        let first = Event::new("a").with_sequence(1);
        let second = Event::new("b").with_sequence(2);
        let unknown = Event::new("c");

        assert_eq!(cmp(&first, &second), Ordering::Less);
        assert_eq!(cmp(&second, &first), Ordering::Greater);
        assert_eq!(cmp(&unknown, &first), Ordering::Less);
    }
}
