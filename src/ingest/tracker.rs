//! Month-keyed ingestion ledger.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{
    format_timestamp, parse_timestamp, IngestionCounts, IngestionProgress, IngestionStatus, Month,
    ARCHIVE_START,
};

/// Result of asking the ledger for work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextMonth {
    Month(Month),
    /// Every month before the current one is complete.
    CaughtUp,
}

/// Read and transition ledger rows. Months without a row are `pending`.
pub struct Tracker;

impl Tracker {
    pub fn get(conn: &Connection, month: Month) -> Result<IngestionProgress> {
        let row = conn
            .query_row(
                "SELECT month, status, records_fetched, records_inserted, records_skipped,
                        error, started_at, completed_at, updated_at
                 FROM ingestion_progress WHERE month = ?1",
                params![month.to_string()],
                progress_from_row,
            )
            .optional()?;
        match row {
            Some(progress) => progress,
            None => Ok(IngestionProgress::pending(month)),
        }
    }

    /// Every stored row, earliest month first.
    pub fn list(conn: &Connection) -> Result<Vec<IngestionProgress>> {
        let mut stmt = conn.prepare(
            "SELECT month, status, records_fetched, records_inserted, records_skipped,
                    error, started_at, completed_at, updated_at
             FROM ingestion_progress ORDER BY month ASC",
        )?;
        let rows = stmt.query_map([], progress_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    /// Move `month` to `status`, recording counts and error text.
    ///
    /// This is the only write path for the ledger. Illegal transitions are
    /// rejected before anything is written.
    pub fn mark(
        conn: &Connection,
        month: Month,
        status: IngestionStatus,
        counts: IngestionCounts,
        error: Option<&str>,
    ) -> Result<IngestionProgress> {
        let current = Self::get(conn, month)?;
        current.status.transition(month, status)?;

        let now = Utc::now();
        let started_at = match status {
            IngestionStatus::InProgress => Some(now),
            IngestionStatus::Pending => None,
            _ => current.started_at,
        };
        let completed_at = status.is_terminal().then_some(now);
        let error = match status {
            IngestionStatus::Failed => error.map(str::to_string),
            _ => None,
        };

        conn.execute(
            "INSERT INTO ingestion_progress
                 (month, status, records_fetched, records_inserted, records_skipped,
                  error, started_at, completed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(month) DO UPDATE SET
                 status = excluded.status,
                 records_fetched = excluded.records_fetched,
                 records_inserted = excluded.records_inserted,
                 records_skipped = excluded.records_skipped,
                 error = excluded.error,
                 started_at = excluded.started_at,
                 completed_at = excluded.completed_at,
                 updated_at = excluded.updated_at",
            params![
                month.to_string(),
                status.as_str(),
                counts.fetched as i64,
                counts.inserted as i64,
                counts.skipped as i64,
                error,
                started_at.as_ref().map(format_timestamp),
                completed_at.as_ref().map(format_timestamp),
                format_timestamp(&now),
            ],
        )?;
        debug!(month = %month, from = %current.status, to = %status, "ledger transition");

        Ok(IngestionProgress {
            month,
            status,
            counts,
            error,
            started_at,
            completed_at,
            updated_at: Some(now),
        })
    }

    /// Earliest month from the archive start whose status is not `complete`,
    /// looking only at months before `current`.
    pub fn next_incomplete_month(conn: &Connection, current: Month) -> Result<NextMonth> {
        Self::next_incomplete_from(conn, ARCHIVE_START, current)
    }

    /// Same as [`Tracker::next_incomplete_month`], starting the scan at `from`.
    pub fn next_incomplete_from(conn: &Connection, from: Month, current: Month) -> Result<NextMonth> {
        let statuses = Self::statuses(conn)?;
        Ok(from
            .max(ARCHIVE_START)
            .until(current)
            .find(|m| statuses.get(m) != Some(&IngestionStatus::Complete))
            .map_or(NextMonth::CaughtUp, NextMonth::Month))
    }

    pub fn statuses(conn: &Connection) -> Result<HashMap<Month, IngestionStatus>> {
        Ok(Self::list(conn)?
            .into_iter()
            .map(|p| (p.month, p.status))
            .collect())
    }
}

fn progress_from_row(row: &Row<'_>) -> rusqlite::Result<Result<IngestionProgress>> {
    let month: String = row.get(0)?;
    let status: String = row.get(1)?;
    let timestamp = |idx: usize| -> rusqlite::Result<_> {
        Ok(row
            .get::<_, Option<String>>(idx)?
            .as_deref()
            .and_then(parse_timestamp))
    };
    let counts = IngestionCounts {
        fetched: row.get::<_, i64>(2)? as u64,
        inserted: row.get::<_, i64>(3)? as u64,
        skipped: row.get::<_, i64>(4)? as u64,
    };
    let error: Option<String> = row.get(5)?;
    let (started_at, completed_at, updated_at) = (timestamp(6)?, timestamp(7)?, timestamp(8)?);

    Ok(parse_key(&month, &status).map(|(month, status)| IngestionProgress {
        month,
        status,
        counts,
        error,
        started_at,
        completed_at,
        updated_at,
    }))
}

fn parse_key(month: &str, status: &str) -> Result<(Month, IngestionStatus)> {
    let month = month
        .parse::<Month>()
        .map_err(|_| Error::validation("month", format!("corrupt ledger month '{}'", month)))?;
    Ok((month, status.parse()?))
}
