//! One month of archive ingestion as a single unit of work.

use rusqlite::Connection;
use std::fmt;
use tracing::{debug, info, warn};

use super::source::ArchiveSource;
use super::tracker::{NextMonth, Tracker};
use crate::error::Result;
use crate::model::{IngestionCounts, IngestionStatus, Month, ObservationRecord, ARCHIVE_START};
use crate::parser::{normalize_record, Normalized};
use crate::store::observations::{delete_month, insert_or_skip};
use crate::store::Store;
use crate::ui::{Phase, Ui};

const PROGRESS_EVERY: u64 = 100;

/// How a single `run_month` call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        month: Month,
        counts: IngestionCounts,
        replaced: usize,
    },
    /// Non-forced run on a month that is already complete.
    AlreadyComplete(Month),
    Failed {
        month: Month,
        error: String,
    },
    CaughtUp,
}

impl JobOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, JobOutcome::Failed { .. })
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed { month, counts, replaced } => {
                write!(
                    f,
                    "{}: complete ({} fetched, {} inserted, {} skipped",
                    month, counts.fetched, counts.inserted, counts.skipped
                )?;
                if *replaced > 0 {
                    write!(f, ", {} replaced", replaced)?;
                }
                write!(f, ")")
            }
            JobOutcome::AlreadyComplete(month) => write!(f, "{}: already complete", month),
            JobOutcome::Failed { month, error } => write!(f, "{}: failed: {}", month, error),
            JobOutcome::CaughtUp => write!(f, "caught up to the present"),
        }
    }
}

/// Totals over the outcomes of one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub already_complete: usize,
    pub inserted: u64,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Completed { counts, .. } => {
                self.completed += 1;
                self.inserted += counts.inserted;
            }
            JobOutcome::Failed { .. } => self.failed += 1,
            JobOutcome::AlreadyComplete(_) => self.already_complete += 1,
            JobOutcome::CaughtUp => {}
        }
    }
}

impl<'o> FromIterator<&'o JobOutcome> for RunSummary {
    fn from_iter<I: IntoIterator<Item = &'o JobOutcome>>(iter: I) -> Self {
        let mut summary = RunSummary::default();
        for outcome in iter {
            summary.record(outcome);
        }
        summary
    }
}

/// Marks the month failed if the job unwinds before reaching a terminal
/// ledger state.
struct FailGuard<'c> {
    conn: &'c Connection,
    month: Month,
    armed: bool,
}

impl FailGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for FailGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(month = %self.month, "ingestion aborted, marking month failed");
            Tracker::mark(
                self.conn,
                self.month,
                IngestionStatus::Failed,
                IngestionCounts::default(),
                Some("aborted"),
            )
            .ok();
        }
    }
}

/// Fetches, normalizes and stores archive records one month at a time.
pub struct IngestionJob<'a, S: ArchiveSource + ?Sized> {
    store: &'a Store,
    source: &'a S,
}

impl<'a, S: ArchiveSource + ?Sized> IngestionJob<'a, S> {
    pub fn new(store: &'a Store, source: &'a S) -> Self {
        Self { store, source }
    }

    /// Ingest the earliest month before `current` that is not yet complete.
    pub fn run_next<U: Ui>(&self, current: Month, ui: &mut U) -> Result<JobOutcome> {
        self.run_next_from(ARCHIVE_START, current, ui)
    }

    /// Like [`IngestionJob::run_next`], ignoring months before `from`.
    pub fn run_next_from<U: Ui>(&self, from: Month, current: Month, ui: &mut U) -> Result<JobOutcome> {
        let next = {
            let conn = self.store.connect()?;
            Tracker::next_incomplete_from(&conn, from, current)?
        };
        match next {
            NextMonth::Month(month) => self.run_month(month, false, ui),
            NextMonth::CaughtUp => {
                info!("all months before {} are complete", current);
                ui.finish_month(&JobOutcome::CaughtUp);
                Ok(JobOutcome::CaughtUp)
            }
        }
    }

    /// Ingest `month`. With `force`, previously stored rows of the month are
    /// replaced by the fresh fetch.
    ///
    /// Fetch failures are recorded in the ledger and returned as
    /// [`JobOutcome::Failed`]; only store failures surface as `Err`.
    pub fn run_month<U: Ui>(&self, month: Month, force: bool, ui: &mut U) -> Result<JobOutcome> {
        ui.begin_month(month, force);

        let conn = self.store.connect()?;
        let mut status = Tracker::get(&conn, month)?.status;

        if status == IngestionStatus::Complete && !force {
            info!(month = %month, "month already complete");
            let outcome = JobOutcome::AlreadyComplete(month);
            ui.finish_month(&outcome);
            return Ok(outcome);
        }
        if status == IngestionStatus::InProgress {
            warn!(month = %month, "found stale in_progress entry");
            Tracker::mark(&conn, month, IngestionStatus::Failed, IngestionCounts::default(), Some("interrupted"))?;
            status = IngestionStatus::Failed;
        }
        if force && status != IngestionStatus::Pending {
            Tracker::mark(&conn, month, IngestionStatus::Pending, IngestionCounts::default(), None)?;
        }

        Tracker::mark(&conn, month, IngestionStatus::InProgress, IngestionCounts::default(), None)?;
        let mut guard = FailGuard {
            conn: &conn,
            month,
            armed: true,
        };
        info!(month = %month, force, "ingesting month");

        let (records, mut counts) = match self.fetch(month, ui) {
            Ok(fetched) => fetched,
            Err((e, counts)) => {
                let error = e.to_string();
                warn!(month = %month, error = %error, "archive fetch failed");
                Tracker::mark(&conn, month, IngestionStatus::Failed, counts, Some(&error))?;
                guard.disarm();
                ui.update_counts(counts);
                let outcome = JobOutcome::Failed { month, error };
                ui.finish_month(&outcome);
                return Ok(outcome);
            }
        };

        ui.set_phase(Phase::Writing);
        let replaced = match self.write(&conn, month, force, &records, &mut counts, ui) {
            Ok(replaced) => replaced,
            Err(e) => {
                let error = e.to_string();
                warn!(month = %month, error = %error, "write failed, rolled back");
                Tracker::mark(&conn, month, IngestionStatus::Failed, counts, Some(&error))?;
                guard.disarm();
                ui.finish_month(&JobOutcome::Failed { month, error });
                return Err(e);
            }
        };
        guard.disarm();

        info!(
            month = %month,
            fetched = counts.fetched,
            inserted = counts.inserted,
            skipped = counts.skipped,
            replaced,
            "month complete"
        );
        let outcome = JobOutcome::Completed { month, counts, replaced };
        ui.finish_month(&outcome);
        Ok(outcome)
    }

    /// Drain the source for `month`, normalizing as records arrive.
    fn fetch<U: Ui>(
        &self,
        month: Month,
        ui: &mut U,
    ) -> std::result::Result<(Vec<ObservationRecord>, IngestionCounts), (crate::error::Error, IngestionCounts)> {
        ui.set_phase(Phase::Fetching);
        let mut counts = IngestionCounts::default();
        let mut records = Vec::new();

        let stream = self.source.fetch_month(month).map_err(|e| (e, counts))?;
        for raw in stream {
            let raw = raw.map_err(|e| (e, counts))?;
            counts.fetched += 1;
            match normalize_record(&raw) {
                Normalized::Record(record) => records.push(*record),
                Normalized::Skipped(reason) => {
                    debug!(month = %month, reason = %reason, "record skipped");
                    counts.skipped += 1;
                }
            }
            if counts.fetched % PROGRESS_EVERY == 0 {
                ui.update_counts(counts);
            }
        }
        ui.update_counts(counts);
        Ok((records, counts))
    }

    /// Replace (forced) or extend the month's rows and mark it complete in
    /// one transaction, so readers never see a partially written month.
    fn write<U: Ui>(
        &self,
        conn: &Connection,
        month: Month,
        force: bool,
        records: &[ObservationRecord],
        counts: &mut IngestionCounts,
        ui: &mut U,
    ) -> Result<usize> {
        let tx = conn.unchecked_transaction()?;
        let replaced = if force { delete_month(&tx, month)? } else { 0 };

        let total = records.len() as u64;
        for (i, record) in records.iter().enumerate() {
            if insert_or_skip(&tx, record)? {
                counts.inserted += 1;
            } else {
                counts.skipped += 1;
            }
            let done = i as u64 + 1;
            if done % PROGRESS_EVERY == 0 || done == total {
                ui.update_counts(*counts);
                ui.write_progress(done, total);
            }
        }

        Tracker::mark(&tx, month, IngestionStatus::Complete, *counts, None)?;
        tx.commit()?;
        Ok(replaced)
    }
}
