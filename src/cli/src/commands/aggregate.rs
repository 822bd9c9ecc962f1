//! Aggregate command.
//!
//! Collects correlated events from a file and emits one merged event per
//! completed group.

use anyhow::Result;
use clap::Args;
use correlator_core::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tabled::Tabled;

use super::{dedup_filter, print_report, read_events, render, run, InputArgs};
use crate::output::OutputFormat;

#[derive(Args)]
pub struct AggregateArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Separator placed between member payloads
    #[arg(short, long, default_value = "")]
    separator: String,
}

#[derive(Debug, Serialize, Tabled)]
struct AggregateRow {
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Payload")]
    payload: String,
}

/// Strategy joining member payloads in arrival order.
pub fn concatenate(
    separator: String,
) -> impl Fn(&GroupSnapshot<Value>) -> std::result::Result<Event<Value>, BoxError> + Send + Sync {
    move |group: &GroupSnapshot<Value>| -> std::result::Result<Event<Value>, BoxError> {
        let joined = group.payloads().map(render).collect::<Vec<_>>().join(&separator);
        Ok(Event::merged(group.group_id(), Value::String(joined)))
    }
}

pub fn execute(args: AggregateArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let events = read_events(&args.input.file)?;

    let correlator = Correlator::from_config(&config.correlation, ExpectedSize)?;
    let aggregator = Aggregator::new(correlator, concatenate(args.separator));

    let sink = Arc::new(MemorySink::<Value>::new());
    let mut pipeline = Pipeline::new(Stage::Aggregate(aggregator), sink.clone());
    if let Some(filter) = dedup_filter(args.input.dedup, config) {
        pipeline = pipeline.with_filter(filter);
    }

    let summary = run(&pipeline, events, args.input.threads);

    let rows: Vec<AggregateRow> = sink
        .take()
        .into_iter()
        .flatten()
        .map(|event| AggregateRow {
            group: event.correlation_id().unwrap_or(NO_CORRELATION_ID).to_string(),
            payload: render(event.payload()),
        })
        .collect();

    print_report(rows, summary, format)
}
