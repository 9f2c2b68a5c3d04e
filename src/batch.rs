//! Multi-year SRE runs.
//!
//! A batch runs [`select_and_extract`] once per requested year, reporting
//! progress through the status channel. A failed year is reported and the
//! batch moves on.

use crate::http::Fetch;
use crate::models::RegistroDetalhe;
use crate::outputs::records::{self, PersistError};
use crate::scrapers::sre::{ScrapeOptions, select_and_extract};
use crate::status::StatusReporter;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, instrument};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum YearsError {
    #[error("enter at least one year")]
    Empty,
    #[error("invalid range: '{0}'")]
    InvalidRange(String),
    #[error("invalid year in range: '{0}'")]
    InvalidRangeYear(String),
    #[error("invalid year: '{0}'")]
    InvalidYear(String),
}

/// Parse a year list such as `"2005, 2008-2010; 2012"`.
///
/// Commas and semicolons separate items, reversed ranges are swapped, and
/// the result is sorted without duplicates.
pub fn parse_years(text: &str) -> Result<Vec<i32>, YearsError> {
    let mut years = BTreeSet::new();
    let parts = text.split([',', ';']).map(str::trim).filter(|p| !p.is_empty());
    for part in parts {
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (start.trim(), end.trim());
                if start.is_empty() || end.is_empty() {
                    return Err(YearsError::InvalidRange(part.to_string()));
                }
                let parse = |s: &str| {
                    s.parse::<i32>()
                        .map_err(|_| YearsError::InvalidRangeYear(part.to_string()))
                };
                let (mut start, mut end) = (parse(start)?, parse(end)?);
                if start > end {
                    std::mem::swap(&mut start, &mut end);
                }
                years.extend(start..=end);
            }
            None => {
                let year = part
                    .parse::<i32>()
                    .map_err(|_| YearsError::InvalidYear(part.to_string()))?;
                years.insert(year);
            }
        }
    }
    if years.is_empty() {
        return Err(YearsError::Empty);
    }
    Ok(years.into_iter().collect())
}

/// Output path for `year` from a path template.
///
/// `{ano}` is replaced by the year. Without it, a multi-year batch adds
/// `_<year>` before the extension so years do not overwrite each other.
/// A blank template gives `None`.
pub fn resolve_out_path(template: &str, year: i32, multiple: bool) -> Option<PathBuf> {
    let template = template.trim();
    if template.is_empty() {
        return None;
    }
    if template.contains("{ano}") {
        return Some(PathBuf::from(template.replace("{ano}", &year.to_string())));
    }
    let base = PathBuf::from(template);
    if !multiple {
        return Some(base);
    }
    let stem = base.file_stem().unwrap_or_default().to_string_lossy();
    let name = match base.extension() {
        Some(ext) => format!("{stem}_{year}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{year}"),
    };
    Some(base.with_file_name(name))
}

/// What a batch should do.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub tipo: String,
    pub json_template: String,
    pub csv_template: Option<String>,
    pub max_records: Option<usize>,
    pub delay: Duration,
    pub start_url: Option<String>,
}

impl BatchOptions {
    fn for_year(&self, year: i32, multiple: bool) -> Option<ScrapeOptions> {
        let json_out = resolve_out_path(&self.json_template, year, multiple)?;
        let mut opts = ScrapeOptions::new(&self.tipo, year, json_out);
        opts.csv_out = self
            .csv_template
            .as_deref()
            .and_then(|t| resolve_out_path(t, year, multiple));
        opts.max_records = self.max_records;
        opts.delay = self.delay;
        if let Some(url) = &self.start_url {
            opts.start_url = url.clone();
        }
        Some(opts)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub years_ok: usize,
    pub years_failed: usize,
    /// Rows extracted across all years.
    pub total_rows: usize,
    /// JSON store size reported by the last successful year.
    pub total_json: usize,
    pub run_rows: Vec<RegistroDetalhe>,
    /// Contents of each year's JSON store after merging, concatenated.
    pub merged_rows: Vec<Map<String, Value>>,
}

impl BatchSummary {
    pub fn totals(&self) -> Vec<String> {
        let mut lines = vec![format!("Total extracted this run: {}", self.total_rows)];
        if self.total_json > 0 {
            lines.push(format!("Total in JSON after merge: {}", self.total_json));
        }
        lines
    }
}

/// Scrape every year in `years`, sending status lines as it goes.
#[instrument(level = "info", skip(fetcher, opts, status), fields(tipo = %opts.tipo, years = years.len()))]
pub async fn run_years<F: Fetch>(
    fetcher: &F,
    opts: &BatchOptions,
    years: &[i32],
    status: &StatusReporter,
) -> BatchSummary {
    let multiple = years.len() > 1;
    let mut summary = BatchSummary::default();

    for &year in years {
        status.send(format!("[year {year}] starting..."));
        let Some(scrape) = opts.for_year(year, multiple) else {
            status.send(format!("[year {year}] ERROR: JSON output path is required"));
            summary.years_failed += 1;
            continue;
        };

        let report = match select_and_extract(fetcher, &scrape).await {
            Ok(report) => report,
            Err(e) => {
                error!(year, error = %e, "Year failed");
                status.send(format!("[year {year}] ERROR: {e}"));
                summary.years_failed += 1;
                continue;
            }
        };

        summary.years_ok += 1;
        summary.total_rows += report.rows.len();
        summary.total_json = report.total_json;
        status.send(format!("[year {year}] OK: {} rows extracted.", report.rows.len()));
        if report.records_failed > 0 {
            status.send(format!(
                "[year {year}] {} of {} records could not be read.",
                report.records_failed, report.records_visited
            ));
        }
        status.send(format!("[year {year}] JSON: {}", scrape.json_out.display()));
        if let Some(csv_out) = &scrape.csv_out {
            status.send(format!("[year {year}] CSV: {}", csv_out.display()));
        }
        summary.run_rows.extend(report.rows);
        summary
            .merged_rows
            .extend(records::load_json_list(&scrape.json_out).await);
    }

    info!(
        ok = summary.years_ok,
        failed = summary.years_failed,
        rows = summary.total_rows,
        "Batch finished"
    );
    for line in summary.totals() {
        status.send(line);
    }
    summary
}

/// Write rows as pretty JSON. Nothing is written for an empty list.
pub async fn dump_rows<T: serde::Serialize>(path: &Path, rows: &[T]) -> Result<bool, PersistError> {
    if rows.is_empty() {
        return Ok(false);
    }
    let text = serde_json::to_string_pretty(rows)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| PersistError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    records::atomic_write(path, &text).await?;
    Ok(true)
}
