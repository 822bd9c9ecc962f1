//! Subcommands and the helpers they share: config discovery, event input
//! and the threaded pipeline runner.

pub mod aggregate;
pub mod config;
pub mod dedup;
pub mod resequence;

use anyhow::{Context, Result};
use clap::Args;
use correlator_core::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::thread;

use crate::output::{self, OutputFormat};

/// Input options shared by the pipeline commands.
#[derive(Args)]
pub struct InputArgs {
    /// JSON-lines file of events ('-' reads stdin)
    pub file: PathBuf,

    /// Number of submitting threads
    #[arg(short = 'j', long, default_value = "1")]
    pub threads: usize,

    /// Drop events whose unique id was already admitted
    #[arg(long)]
    pub dedup: bool,
}

/// Load configuration: an explicit file, else the per-user file when present,
/// else environment and defaults only.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let discovered = path.map(Path::to_path_buf).or_else(|| {
        dirs::config_dir()
            .map(|dir| dir.join("correlator").join("config.toml"))
            .filter(|candidate| candidate.exists())
    });

    let config = match discovered {
        Some(file) => {
            let name = file
                .to_str()
                .with_context(|| format!("Config path is not valid UTF-8: {}", file.display()))?;
            Config::from_file(name).with_context(|| format!("Failed to load {}", file.display()))?
        }
        None => Config::load().context("Failed to load configuration from environment")?,
    };
    Ok(config)
}

/// Read newline-delimited JSON events. Blank lines are skipped.
pub fn read_events(path: &Path) -> Result<Vec<Event<Value>>> {
    let reader: Box<dyn BufRead> = if path == Path::new("-") {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: Event<Value> = serde_json::from_str(&line)
            .with_context(|| format!("Invalid event on line {}", index + 1))?;
        events.push(event);
    }
    Ok(events)
}

/// Filter built from configuration when `--dedup` is set.
pub fn dedup_filter(enabled: bool, config: &Config) -> Option<IdempotentFilter<Value>> {
    enabled.then(|| IdempotentFilter::from_config(&config.idempotent))
}

/// Counters for one pipeline run.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub submitted: usize,
    pub rejected: usize,
    pub emitted: usize,
    pub incomplete_groups: usize,
    pub errors: Vec<String>,
}

impl RunSummary {
    fn merge(&mut self, other: RunSummary) {
        self.submitted += other.submitted;
        self.rejected += other.rejected;
        self.emitted += other.emitted;
        self.errors.extend(other.errors);
    }

    /// Print the summary as table details.
    pub fn print_details(&self) {
        output::print_header("Summary");
        output::print_detail("Submitted", &self.submitted.to_string());
        output::print_detail("Rejected duplicates", &self.rejected.to_string());
        output::print_detail("Emitted events", &self.emitted.to_string());
        output::print_detail("Incomplete groups", &self.incomplete_groups.to_string());
        for error in &self.errors {
            output::print_error(error);
        }
        if self.incomplete_groups > 0 {
            output::print_warning("Some groups never completed; configure correlation.timeout to flush them");
        }
    }
}

/// Submit `events` through `pipeline` from `threads` threads, then sweep
/// expired groups.
///
/// Events are dealt round-robin, so each thread keeps the relative order of
/// the events it was given.
pub fn run(pipeline: &Pipeline<Value>, events: Vec<Event<Value>>, threads: usize) -> RunSummary {
    let threads = threads.max(1);
    let mut buckets: Vec<Vec<Event<Value>>> = (0..threads).map(|_| Vec::new()).collect();
    for (index, event) in events.into_iter().enumerate() {
        buckets[index % threads].push(event);
    }

    let mut summary = RunSummary::default();
    let partials: Vec<RunSummary> = thread::scope(|scope| {
        let handles: Vec<_> = buckets
            .into_iter()
            .map(|bucket| scope.spawn(move || submit_all(pipeline, bucket)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| RunSummary {
                    errors: vec!["Submitting thread panicked".to_string()],
                    ..Default::default()
                })
            })
            .collect()
    });
    for partial in partials {
        summary.merge(partial);
    }

    for error in pipeline.sweep_expired() {
        summary.errors.push(error.to_string());
    }
    summary.incomplete_groups = pipeline.stage().in_flight();
    summary
}

fn submit_all(pipeline: &Pipeline<Value>, events: Vec<Event<Value>>) -> RunSummary {
    let mut summary = RunSummary::default();
    for event in events {
        summary.submitted += 1;
        let event_id = event.id();
        match pipeline.submit(event) {
            Ok(Dispatch::Rejected) => summary.rejected += 1,
            Ok(Dispatch::Buffered) => {}
            Ok(Dispatch::Emitted(count)) => summary.emitted += count,
            Err(e) => summary.errors.push(format!("event {}: {}", event_id, e)),
        }
    }
    summary
}

/// Render a payload for display: strings verbatim, other values as JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Results plus summary, for structured output formats.
#[derive(Serialize)]
pub struct Report<T: Serialize> {
    pub results: Vec<T>,
    pub summary: RunSummary,
}

/// Print rows and summary in the requested format.
pub fn print_report<T>(rows: Vec<T>, summary: RunSummary, format: OutputFormat) -> Result<()>
where
    T: Serialize + tabled::Tabled,
{
    match format {
        OutputFormat::Table => {
            output::print_table(&rows);
            summary.print_details();
            Ok(())
        }
        _ => output::print_item(&Report { results: rows, summary }, format),
    }
}
