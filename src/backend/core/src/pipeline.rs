//! End-to-end wiring: idempotent gate, correlation stage, downstream sink.
//!
//! ```text
//! submit(event) ─▶ IdempotentFilter? ─▶ Aggregator | Resequencer ─▶ EventSink
//! ```
//!
//! Everything runs on the submitting thread. A pipeline may be shared
//! across threads; completions are delivered by the thread whose event
//! completed the group.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::correlation::{Aggregator, Resequencer};
use crate::error::{BoxError, CorrelationError, Result};
use crate::events::Event;
use crate::idempotent::IdempotentFilter;

/// Downstream consumer of emitted events.
pub trait EventSink<P>: Send + Sync {
    /// Deliver one batch: a single merged event or one resequenced group.
    fn deliver(&self, events: Vec<Event<P>>) -> std::result::Result<(), BoxError>;
}

impl<P, F> EventSink<P> for F
where
    F: Fn(Vec<Event<P>>) -> std::result::Result<(), BoxError> + Send + Sync,
{
    fn deliver(&self, events: Vec<Event<P>>) -> std::result::Result<(), BoxError> {
        self(events)
    }
}

/// Sink that keeps every delivered batch in memory.
#[derive(Debug)]
pub struct MemorySink<P> {
    batches: Mutex<Vec<Vec<Event<P>>>>,
}

impl<P> Default for MemorySink<P> {
    fn default() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }
}

impl<P> MemorySink<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all batches delivered so far.
    pub fn take(&self) -> Vec<Vec<Event<P>>> {
        std::mem::take(&mut *self.batches.lock())
    }

    /// Number of batches delivered and not yet taken.
    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P: Send> EventSink<P> for MemorySink<P> {
    fn deliver(&self, events: Vec<Event<P>>) -> std::result::Result<(), BoxError> {
        self.batches.lock().push(events);
        Ok(())
    }
}

/// The correlation stage a pipeline runs.
pub enum Stage<P> {
    Aggregate(Aggregator<P>),
    Resequence(Resequencer<P>),
}

impl<P: Send + Sync + 'static> Stage<P> {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Aggregate(_) => "aggregate",
            Stage::Resequence(_) => "resequence",
        }
    }

    /// Groups currently collecting.
    pub fn in_flight(&self) -> usize {
        match self {
            Stage::Aggregate(aggregator) => aggregator.correlator().registry().len(),
            Stage::Resequence(resequencer) => resequencer.correlator().registry().len(),
        }
    }

    fn process(&self, event: Event<P>) -> Result<Vec<Event<P>>> {
        match self {
            Stage::Aggregate(aggregator) => Ok(aggregator.process(event)?.into_iter().collect()),
            Stage::Resequence(resequencer) => resequencer.process(event),
        }
    }
}

/// What happened to a submitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Dropped by the idempotent filter as already seen
    Rejected,
    /// Accepted; its group is still collecting
    Buffered,
    /// Completed a group; this many events were delivered downstream
    Emitted(usize),
}

/// Idempotent gate, correlation stage and sink.
pub struct Pipeline<P> {
    filter: Option<IdempotentFilter<P>>,
    stage: Stage<P>,
    sink: Arc<dyn EventSink<P>>,
}

impl<P: Send + Sync + 'static> Pipeline<P> {
    pub fn new(stage: Stage<P>, sink: Arc<dyn EventSink<P>>) -> Self {
        Self {
            filter: None,
            stage,
            sink,
        }
    }

    /// Admit events through `filter` before the stage sees them.
    pub fn with_filter(mut self, filter: IdempotentFilter<P>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn stage(&self) -> &Stage<P> {
        &self.stage
    }

    /// Run one event through the pipeline.
    ///
    /// The filter records the event's unique id before the stage runs. If
    /// the stage then fails (a sequence out of range, a failed aggregation),
    /// the id stays recorded and resubmitting the same event is
    /// [`Dispatch::Rejected`]; a corrected event needs a new unique id.
    #[instrument(skip(self, event), fields(stage = self.stage.name(), event_id = %event.id()))]
    pub fn submit(&self, event: Event<P>) -> Result<Dispatch> {
        if let Some(filter) = &self.filter {
            if !filter.is_match(&event)? {
                return Ok(Dispatch::Rejected);
            }
        }

        let emitted = self.stage.process(event)?;
        if emitted.is_empty() {
            return Ok(Dispatch::Buffered);
        }

        let count = emitted.len();
        self.deliver(emitted)?;
        debug!(count, "Events delivered");
        Ok(Dispatch::Emitted(count))
    }

    /// Sweep the stage for expired groups, delivering partial results.
    ///
    /// Returns the timeout, aggregation and delivery errors the sweep
    /// produced. A failed delivery does not stop the remaining ones.
    pub fn sweep_expired(&self) -> Vec<CorrelationError> {
        let (batches, mut errors) = match &self.stage {
            Stage::Aggregate(aggregator) => {
                let report = aggregator.sweep_expired();
                let batches: Vec<_> = report.emitted.into_iter().map(|event| vec![event]).collect();
                (batches, report.errors)
            }
            Stage::Resequence(resequencer) => {
                let report = resequencer.sweep_expired();
                (report.emitted, report.errors)
            }
        };

        for batch in batches {
            if let Err(err) = self.deliver(batch) {
                errors.push(err);
            }
        }
        errors
    }

    fn deliver(&self, events: Vec<Event<P>>) -> Result<()> {
        self.sink.deliver(events).map_err(|source| {
            let err = CorrelationError::delivery_failed(source);
            err.log();
            err
        })
    }
}
