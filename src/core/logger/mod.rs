//! Logging functionality for the lock inspector
//!
//! Anomalies and collision reports can be written to a JSON-lines file by
//! [`EventLogger`]; [`read_log`] and [`LogSummary`] read such a file back.
//! Free-form diagnostics go through the `log` facade.

mod event_logger;

pub use event_logger::{EventLogger, LogRecord};

use crate::core::types::{AnomalyKind, Branch, CollisionReport, LockId};
use anyhow::{Context, Result};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Read every record of a log written by [`EventLogger`]
///
/// Blank lines are ignored.
///
/// # Errors
/// Returns an error naming the line if the file cannot be read or a line is
/// not a valid record
pub fn read_log<P: AsRef<Path>>(path: P) -> Result<Vec<LogRecord>> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("Failed to open log file {}", path.display()))?;

    let mut records = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", number + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("Invalid log record on line {}", number + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// Aggregate view over the records of one log
#[derive(Debug, Default)]
pub struct LogSummary {
    pub lock_order_violations: usize,
    pub unbalanced_unlocks: usize,
    pub depth_overflows: usize,
    pub report_count: usize,
    /// Most recent collision report, which covers every earlier one that is
    /// still present in the tree
    pub latest_report: Option<CollisionReport>,
    /// How many ranked entries of the latest report to print
    pub top: usize,
}

impl LogSummary {
    pub fn from_records(records: Vec<LogRecord>, top: usize) -> Self {
        let mut summary = LogSummary {
            top,
            ..Default::default()
        };

        for record in records {
            match record {
                LogRecord::Anomaly(anomaly) => match anomaly.kind {
                    AnomalyKind::LockOrderViolation { .. } => summary.lock_order_violations += 1,
                    AnomalyKind::UnbalancedUnlock => summary.unbalanced_unlocks += 1,
                    AnomalyKind::DepthOverflow { .. } => summary.depth_overflows += 1,
                },
                LogRecord::CollisionReport(report) => {
                    summary.report_count += 1;
                    summary.latest_report = Some(report);
                }
            }
        }
        summary
    }
}

fn format_locks(locks: &[LockId]) -> String {
    let parts: Vec<String> = locks.iter().map(|l| format!("{l:#x}")).collect();
    format!("[{}]", parts.join(" -> "))
}

fn format_branch(branch: &Branch) -> String {
    format_locks(&branch.locks())
}

impl fmt::Display for LogSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "lock order violations: {}", self.lock_order_violations)?;
        writeln!(f, "unbalanced unlocks:    {}", self.unbalanced_unlocks)?;
        writeln!(f, "depth overflows:       {}", self.depth_overflows)?;
        writeln!(f, "collision reports:     {}", self.report_count)?;

        let Some(report) = &self.latest_report else {
            return Ok(());
        };

        writeln!(
            f,
            "\nlatest report ({}): {} colliding pair(s) across {} branch(es)",
            report.timestamp,
            report.pairs.len(),
            report.branch_count
        )?;
        for entry in report.entries.iter().take(self.top) {
            writeln!(
                f,
                "  {} collides with {} branch(es):",
                format_branch(&entry.branch),
                entry.degree()
            )?;
            for other in &entry.collides_with {
                writeln!(f, "    {}", format_branch(other))?;
            }
        }
        Ok(())
    }
}
