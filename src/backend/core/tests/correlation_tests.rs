//! Integration tests for grouping, aggregation and resequencing.
//!
//! Tests cover:
//! - Exactly-once drains under concurrent completion
//! - Group isolation across interleaved ids
//! - Sentinel grouping for events without a correlation id
//! - Ordering of resequenced groups
//! - Aggregation failures and over-delivery
//! - Expiry sweeps racing completions

use correlator_core::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn concat(group: &GroupSnapshot<String>) -> std::result::Result<Event<String>, BoxError> {
    Ok(Event::merged(group.group_id(), group.payloads().map(String::as_str).collect()))
}

fn text(payload: &str) -> Event<String> {
    Event::new(payload.to_string())
}

// ============================================================================
// Exactly-Once Drain Tests
// ============================================================================

#[test]
fn test_two_threads_complete_group_once() {
    for _ in 0..200 {
        let aggregator = Arc::new(Aggregator::with_strategy(concat));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [("A", 1), ("B", 2)]
            .into_iter()
            .map(|(payload, seq)| {
                let aggregator = Arc::clone(&aggregator);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    aggregator.process(text(payload).with_correlation("x", seq, 2)).unwrap()
                })
            })
            .collect();

        let emitted: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].payload().len(), 2);
        assert!(!aggregator.correlator().registry().contains(&GroupId::new("x")));
    }
}

#[test]
fn test_strategy_runs_once_per_group_under_contention() {
    const THREADS: usize = 8;
    const GROUP_SIZE: usize = 16;

    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invocations);
    let aggregator = Arc::new(Aggregator::with_strategy(
        move |group: &GroupSnapshot<u32>| -> std::result::Result<Event<u32>, BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Event::merged(group.group_id(), group.len() as u32))
        },
    ));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let aggregator = Arc::clone(&aggregator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut emitted = Vec::new();
                for seq in (t..GROUP_SIZE).step_by(THREADS) {
                    let event = Event::new(seq as u32).with_correlation("shared", seq as u32 + 1, GROUP_SIZE);
                    if let Some(merged) = aggregator.process(event).unwrap() {
                        emitted.push(merged);
                    }
                }
                emitted
            })
        })
        .collect();

    let emitted: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    assert_eq!(emitted.len(), 1);
    assert_eq!(*emitted[0].payload(), GROUP_SIZE as u32);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert!(aggregator.correlator().registry().is_empty());
}

// ============================================================================
// Isolation Tests
// ============================================================================

#[test]
fn test_interleaved_ids_never_mix() {
    const IDS: usize = 32;
    const SIZE: usize = 4;

    let resequencer = Arc::new(Resequencer::<String>::by_sequence());
    let barrier = Arc::new(Barrier::new(SIZE));

    let handles: Vec<_> = (1..=SIZE)
        .map(|seq| {
            let resequencer = Arc::clone(&resequencer);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut released = Vec::new();
                for id in 0..IDS {
                    let group = format!("order-{}", id);
                    let event = Event::new(group.clone()).with_correlation(group, seq as u32, SIZE);
                    let batch = resequencer.process(event).unwrap();
                    if !batch.is_empty() {
                        released.push(batch);
                    }
                }
                released
            })
        })
        .collect();

    let batches: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    assert_eq!(batches.len(), IDS);

    let mut seen = HashSet::new();
    for batch in &batches {
        assert_eq!(batch.len(), SIZE);
        let owner = batch[0].correlation_id().unwrap().to_string();
        assert!(batch.iter().all(|e| e.payload() == &owner));
        let sequences: Vec<_> = batch.iter().map(|e| e.correlation_sequence()).collect();
        assert_eq!(sequences, (1..=SIZE as u32).map(Some).collect::<Vec<_>>());
        assert!(seen.insert(owner));
    }
}

// ============================================================================
// Sentinel Grouping Tests
// ============================================================================

#[test]
fn test_uncorrelated_events_share_sentinel_group() {
    let aggregator = Aggregator::new(Correlator::new(FixedCount(2)), concat);

    assert!(aggregator.process(text("a")).unwrap().is_none());
    let merged = aggregator.process(text("b")).unwrap().unwrap();
    assert_eq!(merged.correlation_id(), Some(NO_CORRELATION_ID));
    assert_eq!(merged.payload(), "ab");

    // a drained sentinel group does not block the next one
    assert!(aggregator.process(text("c")).unwrap().is_none());
    assert!(aggregator
        .correlator()
        .registry()
        .contains(&GroupId::new(NO_CORRELATION_ID)));
    let merged = aggregator.process(text("d")).unwrap().unwrap();
    assert_eq!(merged.payload(), "cd");
}

#[test]
fn test_unset_marker_folds_to_sentinel() {
    let aggregator = Aggregator::new(Correlator::new(FixedCount(2)), concat);
    aggregator.process(text("a").with_correlation_id("-1")).unwrap();
    let merged = aggregator.process(text("b")).unwrap().unwrap();
    assert_eq!(merged.payload(), "ab");
}

// ============================================================================
// Ordering And Aggregation Tests
// ============================================================================

#[test]
fn test_resequencer_orders_by_sequence() {
    let resequencer = Resequencer::<String>::by_sequence();

    assert!(resequencer.process(text("3").with_correlation("x", 3, 3)).unwrap().is_empty());
    assert!(resequencer.process(text("1").with_correlation("x", 1, 3)).unwrap().is_empty());
    let released = resequencer.process(text("2").with_correlation("x", 2, 3)).unwrap();

    let payloads: Vec<_> = released.iter().map(|e| e.payload().as_str()).collect();
    assert_eq!(payloads, vec!["1", "2", "3"]);
}

#[test]
fn test_concatenation_in_arrival_order() {
    let aggregator = Aggregator::with_strategy(concat);

    aggregator.process(text("foo").with_correlation("x", 2, 2)).unwrap();
    let merged = aggregator.process(text("bar").with_correlation("x", 1, 2)).unwrap().unwrap();

    assert_eq!(merged.payload(), "foobar");
    assert!(aggregator.correlator().registry().is_empty());
}

#[test]
fn test_failed_aggregation_is_not_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let aggregator = Aggregator::with_strategy(
        move |_: &GroupSnapshot<String>| -> std::result::Result<Event<String>, BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("downstream schema mismatch".into())
        },
    );

    aggregator.process(text("a").with_correlation("x", 1, 2)).unwrap();
    let err = aggregator.process(text("b").with_correlation("x", 2, 2)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::AggregationFailed);
    assert!(std::error::Error::source(&err).is_some());
    assert!(aggregator.correlator().registry().is_empty());

    // the next member opens a fresh group rather than replaying the failed one
    assert!(aggregator.process(text("c").with_correlation("x", 1, 2)).unwrap().is_none());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_over_delivery_rejected_without_side_effects() {
    let aggregator = Aggregator::with_strategy(concat);
    aggregator.process(text("a").with_correlation("x", 1, 2)).unwrap();
    aggregator.process(text("z").with_correlation("y", 1, 2)).unwrap();

    let err = aggregator.process(text("b").with_correlation("x", 3, 2)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SequenceOutOfRange);
    assert_eq!(aggregator.correlator().registry().get(&GroupId::new("x")).unwrap().size(), 1);
    assert_eq!(aggregator.correlator().registry().get(&GroupId::new("y")).unwrap().size(), 1);

    let merged = aggregator.process(text("b").with_correlation("x", 2, 2)).unwrap().unwrap();
    assert_eq!(merged.payload(), "ab");
}

#[test]
fn test_group_without_size_never_completes() {
    let resequencer = Resequencer::<String>::by_sequence();
    for i in 0..10 {
        let released = resequencer
            .process(text(&i.to_string()).with_correlation_id("open-ended"))
            .unwrap();
        assert!(released.is_empty());
    }
    let group = resequencer
        .correlator()
        .registry()
        .get(&GroupId::new("open-ended"))
        .unwrap();
    assert_eq!(group.size(), 10);
}

// ============================================================================
// Claim And Expiry Tests
// ============================================================================

#[test]
fn test_claim_is_compare_and_remove() {
    let registry = GroupRegistry::new();
    let id = GroupId::new("x");

    let stale = registry.add_event(&id, Event::new(1u32)).unwrap();
    assert!(registry.claim(&stale));

    let fresh = registry.add_event(&id, Event::new(2u32)).unwrap();
    assert!(!registry.claim(&stale));
    assert!(registry.contains(&id));
    assert!(registry.claim(&fresh));
    assert!(!registry.claim(&fresh));
}

#[test]
fn test_sealed_group_rejects_appends() {
    let registry = GroupRegistry::new();
    let id = GroupId::new("x");
    let group = registry.add_event(&id, Event::new(1u32)).unwrap();
    registry.remove(&id).unwrap();

    let err = group.add_event(Event::new(2u32)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::GroupAlreadyDrained);
}

#[test]
fn test_sweep_racing_completion_drains_once() {
    for _ in 0..100 {
        let correlator = Correlator::new(ExpectedSize)
            .with_timeout(Duration::from_millis(1))
            .with_fail_on_timeout(false);
        let aggregator = Arc::new(Aggregator::new(correlator, concat));
        aggregator.process(text("a").with_correlation("x", 1, 2)).unwrap();
        thread::sleep(Duration::from_millis(2));

        let barrier = Arc::new(Barrier::new(2));
        let completer = {
            let aggregator = Arc::clone(&aggregator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                aggregator.process(text("b").with_correlation("x", 2, 2))
            })
        };
        let sweeper = {
            let aggregator = Arc::clone(&aggregator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                aggregator.sweep_expired()
            })
        };

        let completed = completer.join().unwrap();
        let swept = sweeper.join().unwrap();

        let from_completion = usize::from(matches!(completed, Ok(Some(_))));
        // a sweep that won leaves "b" to open a fresh group
        let from_sweep = swept.emitted.len();
        assert_eq!(from_completion + from_sweep, 1);
        assert!(swept.errors.is_empty());
    }
}

#[test]
fn test_late_arrival_guard_drops_reused_id() {
    let correlator = Correlator::new(ExpectedSize).with_processed_capacity(8);
    let aggregator = Aggregator::new(correlator, concat);

    aggregator.process(text("a").with_correlation("x", 1, 1)).unwrap().unwrap();
    assert!(aggregator.process(text("late").with_correlation("x", 1, 1)).unwrap().is_none());
    assert!(aggregator.correlator().registry().is_empty());
}

#[test]
fn test_late_member_racing_completion_never_reopens_group() {
    for _ in 0..200 {
        let correlator = Correlator::new(ExpectedSize).with_processed_capacity(8);
        let aggregator = Arc::new(Aggregator::new(correlator, concat));
        assert!(aggregator.process(text("a").with_correlation("x", 1, 2)).unwrap().is_none());
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [("b", 2), ("late", 1)]
            .into_iter()
            .map(|(payload, seq)| {
                let aggregator = Arc::clone(&aggregator);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    aggregator.process(text(payload).with_correlation("x", seq, 2)).unwrap()
                })
            })
            .collect();

        let emitted: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(emitted.len(), 1);
        assert!(aggregator.correlator().registry().is_empty());
    }
}

#[test]
fn test_config_driven_correlator() {
    let config = CorrelationConfig {
        no_correlation_id: "orphans".to_string(),
        processed_group_capacity: 4,
        shard_amount: Some(4),
        ..Default::default()
    };
    let correlator = Correlator::from_config(&config, FixedCount(1)).unwrap();
    let aggregator = Aggregator::new(correlator, concat);

    let merged = aggregator.process(text("solo")).unwrap().unwrap();
    assert_eq!(merged.correlation_id(), Some("orphans"));
    // uncorrelated events start a fresh group even with the guard on
    let again = aggregator.process(text("again")).unwrap().unwrap();
    assert_eq!(again.payload(), "again");
    assert_eq!(again.correlation_id(), Some("orphans"));
}
