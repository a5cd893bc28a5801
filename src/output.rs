//! Output formatting and persistence for aggregation reports.
//!
//! Supports a logged summary, JSON report writing, and the per-agency status
//! CSV log.

use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use crate::aggregator::AggregateReport;
use crate::error::Result;

/// One row of the status log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRow<'a> {
    pub timestamp: DateTime<Utc>,
    pub agency_id: &'a str,
    pub name: &'a str,
    pub has_live_data: bool,
    pub alert_count: usize,
    pub error: Option<&'a str>,
}

impl<'a> StatusRow<'a> {
    pub fn from_report(report: &'a AggregateReport) -> Vec<StatusRow<'a>> {
        report
            .statuses
            .iter()
            .map(|(agency_id, status)| StatusRow {
                timestamp: report.generated_at,
                agency_id,
                name: &status.name,
                has_live_data: status.has_live_data,
                alert_count: status.alert_count,
                error: status.error.as_deref(),
            })
            .collect()
    }
}

/// Logs one line per agency plus the overall counts.
pub fn print_summary(report: &AggregateReport) {
    for (agency_id, status) in &report.statuses {
        info!(
            agency_id = %agency_id,
            live = status.has_live_data,
            alerts = status.alert_count,
            error = status.error.as_deref().unwrap_or(""),
            "Agency status"
        );
    }
    info!(
        total = report.stats.total,
        active = report.stats.active,
        urgent = report.stats.urgent(),
        "Alert summary"
    );
}

/// Writes the report as pretty-printed JSON to `path`, or to stdout.
pub fn write_report(report: &AggregateReport, path: Option<&str>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    match path {
        Some(path) => {
            if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(path, json)?;
            debug!(path, "Report written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}")?;
        }
    }
    Ok(())
}

/// Appends one row per agency to a CSV status log.
///
/// Creates the file with headers if it does not already exist.
pub fn append_status_rows(path: &str, report: &AggregateReport) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending status rows");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for row in StatusRow::from_report(report) {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}
