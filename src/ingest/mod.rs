//! Write side: month-by-month archive backfill and its ledger.

pub mod job;
pub mod mast;
pub mod report;
pub mod source;
pub mod tracker;

pub use job::{IngestionJob, JobOutcome, RunSummary};
pub use mast::{MastClient, MastConfig};
pub use report::ProgressReport;
pub use source::{ArchiveSource, JsonlSource, RawRecord, RecordStream};
pub use tracker::{NextMonth, Tracker};
