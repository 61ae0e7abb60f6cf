//! Backfill progress summary for the `progress` command.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::tracker::{NextMonth, Tracker};
use crate::error::Result;
use crate::model::{format_timestamp, IngestionStatus, Month, ARCHIVE_START};

const BAR_WIDTH: usize = 30;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct YearProgress {
    pub year: i32,
    pub total: usize,
    pub completed: Vec<u32>,
    pub pending: Vec<u32>,
    pub failed: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    pub total_months: usize,
    pub completed_months: usize,
    pub total_observations: u64,
    #[serde(serialize_with = "serialize_opt_timestamp")]
    pub last_run: Option<DateTime<Utc>>,
    pub years: Vec<YearProgress>,
    #[serde(serialize_with = "serialize_next")]
    pub next_month: NextMonth,
}

impl ProgressReport {
    /// Summarize every month from the archive start up to, excluding, `current`.
    pub fn build(conn: &Connection, current: Month) -> Result<Self> {
        let ledger = Tracker::list(conn)?;
        let statuses: BTreeMap<Month, IngestionStatus> =
            ledger.iter().map(|p| (p.month, p.status)).collect();
        let last_run = ledger.iter().filter_map(|p| p.updated_at).max();

        let mut years: BTreeMap<i32, YearProgress> = BTreeMap::new();
        for month in ARCHIVE_START.until(current) {
            let year = years.entry(month.year()).or_insert_with(|| YearProgress {
                year: month.year(),
                ..Default::default()
            });
            year.total += 1;
            match statuses.get(&month) {
                Some(IngestionStatus::Complete) => year.completed.push(month.month()),
                Some(IngestionStatus::Failed) => year.failed.push(month.month()),
                _ => year.pending.push(month.month()),
            }
        }

        let total_observations: i64 =
            conn.query_row("SELECT COUNT(*) FROM observations", [], |row| row.get(0))?;
        let years: Vec<YearProgress> = years.into_values().collect();

        Ok(Self {
            total_months: years.iter().map(|y| y.total).sum(),
            completed_months: years.iter().map(|y| y.completed.len()).sum(),
            total_observations: total_observations as u64,
            last_run,
            years,
            next_month: Tracker::next_incomplete_month(conn, current)?,
        })
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn month_list(months: &[u32]) -> String {
    months
        .iter()
        .map(|m| format!("{:02}", m))
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(70);
        writeln!(f, "{}", rule)?;
        writeln!(f, "JWST ARCHIVE BACKFILL PROGRESS")?;
        writeln!(f, "{}", rule)?;
        writeln!(
            f,
            "Overall: {}/{} months ({:.1}%)",
            self.completed_months,
            self.total_months,
            percent(self.completed_months, self.total_months)
        )?;
        writeln!(f, "Observations: {}", self.total_observations)?;
        if let Some(last_run) = self.last_run {
            writeln!(f, "Last run: {}", last_run.format("%Y-%m-%d %H:%M:%S"))?;
        }

        for year in &self.years {
            let filled = if year.total == 0 {
                0
            } else {
                year.completed.len() * BAR_WIDTH / year.total
            };
            writeln!(
                f,
                "\n{}: {}{} {}/{} ({:.0}%)",
                year.year,
                "█".repeat(filled),
                "░".repeat(BAR_WIDTH - filled),
                year.completed.len(),
                year.total,
                percent(year.completed.len(), year.total)
            )?;
            if !year.completed.is_empty() {
                writeln!(f, "  completed: {}", month_list(&year.completed))?;
            }
            if !year.failed.is_empty() {
                writeln!(f, "  failed:    {}", month_list(&year.failed))?;
            }
            if !year.pending.is_empty() {
                writeln!(f, "  pending:   {}", month_list(&year.pending))?;
            }
        }

        writeln!(f)?;
        match self.next_month {
            NextMonth::Month(month) => write!(f, "Next month to process: {}", month),
            NextMonth::CaughtUp => write!(f, "Caught up to the present"),
        }
    }
}

fn serialize_opt_timestamp<S: serde::Serializer>(
    value: &Option<DateTime<Utc>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(dt) => serializer.serialize_str(&format_timestamp(dt)),
        None => serializer.serialize_none(),
    }
}

fn serialize_next<S: serde::Serializer>(
    value: &NextMonth,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        NextMonth::Month(month) => serializer.serialize_str(&month.to_string()),
        NextMonth::CaughtUp => serializer.serialize_none(),
    }
}
