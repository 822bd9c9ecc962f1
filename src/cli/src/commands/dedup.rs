//! Dedup command.
//!
//! Runs only the idempotent filter over a file and reports which events
//! were admitted.

use anyhow::Result;
use clap::Args;
use correlator_core::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;

use super::{read_events, RunSummary};
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct DedupArgs {
    /// JSON-lines file of events ('-' reads stdin)
    file: PathBuf,

    /// Consumer identity, overriding idempotent.consumer
    #[arg(long)]
    consumer: Option<String>,
}

#[derive(Debug, Serialize, Tabled)]
struct DedupRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Unique ID")]
    unique_id: String,
    #[tabled(rename = "Status")]
    status: String,
}

pub fn execute(args: DedupArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let events = read_events(&args.file)?;

    let mut idempotent = config.idempotent.clone();
    if let Some(consumer) = args.consumer {
        idempotent.consumer = consumer;
    }
    let filter = IdempotentFilter::from_config(&idempotent);

    let mut summary = RunSummary::default();
    let mut rows = Vec::with_capacity(events.len());
    for (index, event) in events.iter().enumerate() {
        summary.submitted += 1;
        let status = match filter.is_match(event) {
            Ok(true) => {
                summary.emitted += 1;
                "accepted".to_string()
            }
            Ok(false) => {
                summary.rejected += 1;
                "duplicate".to_string()
            }
            Err(e) => {
                summary.errors.push(e.to_string());
                format!("error: {}", e.code())
            }
        };
        rows.push(DedupRow {
            index: index + 1,
            unique_id: event.unique_id().unwrap_or("-").to_string(),
            status,
        });
    }

    match format {
        OutputFormat::Table => {
            output::print_table(&rows);
            output::print_header("Summary");
            output::print_detail("Consumer", filter.consumer());
            output::print_detail("Accepted", &summary.emitted.to_string());
            output::print_detail("Duplicates", &summary.rejected.to_string());
            for error in &summary.errors {
                output::print_error(error);
            }
            Ok(())
        }
        _ => output::print_item(&super::Report { results: rows, summary }, format),
    }
}
