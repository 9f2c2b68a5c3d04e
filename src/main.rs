//! # Vinculos
//!
//! Two research utilities for Brazilian market and news data:
//!
//! - **graph**: searches news titles through Google Custom Search or Vertex AI
//!   Search, counts the words they share, and draws a star graph around the
//!   query term as a standalone HTML page.
//! - **sre**: walks the CVM SRE public consultation pages for a given offering
//!   type and range of years, extracts the IPO records, and merges them into a
//!   JSON store (with an optional CSV export).
//!
//! ## Usage
//!
//! ```sh
//! vinculos graph --query corrupcao --pages 2
//! vinculos test-connection
//! vinculos sre --tipo ACOES --anos "2004-2006" --csv-out "data/sre_{ano}.csv"
//! ```
//!
//! ## Architecture
//!
//! 1. **Settings**: flags and environment, over an optional YAML file
//! 2. **Fetching**: search APIs, or the CVM pages through a retrying fetcher
//! 3. **Extraction**: word counts, or label/table lookups on record pages
//! 4. **Output**: report files, or the merged JSON store
//!
//! Progress lines go to stdout through a status channel; logs go to stderr.

use clap::Parser;
use std::error::Error;
use tracing::{info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod batch;
mod cli;
mod config;
mod graph;
mod http;
mod models;
mod outputs;
mod pipeline;
mod scrapers;
mod search;
mod status;
mod text;
mod utils;

use cli::{Cli, Command, SreArgs};
use search::SearchClient;
use status::{StatusReporter, spawn_printer};
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let args = Cli::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "vinculos starting up");

    // The job runs on this task. The printer exits once every sender is dropped.
    let (status, rx) = StatusReporter::channel();
    let printer = spawn_printer(rx);

    let outcome = dispatch(args.command, &status).await;

    drop(status);
    printer.await?;
    info!(elapsed = ?start_time.elapsed(), "Finished");
    outcome
}

async fn dispatch(command: Command, status: &StatusReporter) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Graph { search, output_dir } => {
            let settings = search.settings()?;
            ensure_writable_dir(&output_dir).await?;
            let client = SearchClient::from_settings(&settings)?;
            status.send(format!("Searching \"{}\" ({} page(s))...", settings.query, settings.pages));
            let report = pipeline::run_pipeline(&settings, &client, &output_dir).await?;
            for line in pipeline::summary_lines(&report) {
                status.send(line);
            }
            Ok(())
        }
        Command::TestConnection { search } => {
            let settings = search.settings()?;
            let client = SearchClient::from_settings(&settings)?;
            status.send(client.test_connection(&settings.query).await);
            Ok(())
        }
        Command::Sre(sre) => run_sre(&sre, status).await,
    }
}

#[instrument(level = "info", skip_all, fields(tipo = %args.tipo, anos = %args.anos))]
async fn run_sre(args: &SreArgs, status: &StatusReporter) -> Result<(), Box<dyn Error>> {
    let years = batch::parse_years(&args.anos)?;
    let fetcher = http::default_fetcher()?;
    let opts = args.batch_options();
    status.send(format!("Running {} year(s) for {}...", years.len(), opts.tipo));

    let summary = batch::run_years(&fetcher, &opts, &years, status).await;

    if let Some(path) = &args.dump_run {
        if batch::dump_rows(path, &summary.run_rows).await? {
            status.send(format!("Run rows written to {}", path.display()));
        } else {
            status.send("No rows extracted; run dump skipped.");
        }
    }
    if let Some(path) = &args.dump_merged {
        if batch::dump_rows(path, &summary.merged_rows).await? {
            status.send(format!("Merged rows written to {}", path.display()));
        } else {
            status.send("No merged rows; merged dump skipped.");
        }
    }

    if summary.years_ok == 0 {
        warn!(failed = summary.years_failed, "No year completed");
        return Err("no year completed successfully".into());
    }
    Ok(())
}
