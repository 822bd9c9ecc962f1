//! Resequence command.
//!
//! Collects correlated events from a file and releases each completed group
//! ordered by correlation sequence.

use anyhow::Result;
use clap::Args;
use correlator_core::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tabled::Tabled;

use super::{dedup_filter, print_report, read_events, render, run, InputArgs};
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct ResequenceArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Release groups in arrival order instead of sequence order
    #[arg(long)]
    unordered: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct ResequenceRow {
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Position")]
    position: usize,
    #[tabled(rename = "Sequence")]
    sequence: String,
    #[tabled(rename = "Payload")]
    payload: String,
}

pub fn execute(args: ResequenceArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let events = read_events(&args.input.file)?;

    let correlator = Correlator::from_config(&config.correlation, ExpectedSize)?;
    let comparator = if args.unordered {
        output::print_warning("Resequencing without a comparator; groups keep arrival order");
        None
    } else {
        Some(by_correlation_sequence())
    };
    let resequencer = Resequencer::new(correlator, comparator);

    let sink = Arc::new(MemorySink::<Value>::new());
    let mut pipeline = Pipeline::new(Stage::Resequence(resequencer), sink.clone());
    if let Some(filter) = dedup_filter(args.input.dedup, config) {
        pipeline = pipeline.with_filter(filter);
    }

    let summary = run(&pipeline, events, args.input.threads);

    let sentinel = config.correlation.no_correlation_id.as_str();
    let rows: Vec<ResequenceRow> = sink
        .take()
        .into_iter()
        .flat_map(|batch| {
            batch.into_iter().enumerate().map(move |(position, event)| ResequenceRow {
                group: event.correlation_id().unwrap_or(sentinel).to_string(),
                position: position + 1,
                sequence: event
                    .correlation_sequence()
                    .map_or_else(|| "-".to_string(), |s| s.to_string()),
                payload: render(event.payload()),
            })
        })
        .collect();

    print_report(rows, summary, format)
}
