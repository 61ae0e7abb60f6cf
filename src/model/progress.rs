use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::model::month::{format_timestamp, Month};

/// Lifecycle of one month in the ingestion ledger.
///
/// ```text
/// pending -> in_progress -> complete
///                        -> failed -> in_progress
/// complete | failed -> pending        (forced re-fetch only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Pending => "pending",
            IngestionStatus::InProgress => "in_progress",
            IngestionStatus::Complete => "complete",
            IngestionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestionStatus::Complete | IngestionStatus::Failed)
    }

    /// Whether the ledger may move from `self` to `next`.
    pub fn can_transition_to(&self, next: IngestionStatus) -> bool {
        use IngestionStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Complete)
                | (InProgress, Failed)
                | (Failed, InProgress)
                | (Complete, Pending)
                | (Failed, Pending)
                | (Pending, Pending)
        )
    }

    pub fn transition(self, month: Month, next: IngestionStatus) -> Result<IngestionStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                month: month.to_string(),
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(IngestionStatus::Pending),
            "in_progress" => Ok(IngestionStatus::InProgress),
            "complete" => Ok(IngestionStatus::Complete),
            "failed" => Ok(IngestionStatus::Failed),
            other => Err(Error::validation("status", format!("unknown status '{}'", other))),
        }
    }
}

/// Record counters for one ingestion attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestionCounts {
    pub fetched: u64,
    pub inserted: u64,
    pub skipped: u64,
}

/// One row of the ingestion ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionProgress {
    pub month: Month,
    pub status: IngestionStatus,
    pub counts: IngestionCounts,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl IngestionProgress {
    /// The implicit state of a month that has never been attempted.
    pub fn pending(month: Month) -> Self {
        Self {
            month,
            status: IngestionStatus::Pending,
            counts: IngestionCounts::default(),
            error: None,
            started_at: None,
            completed_at: None,
            updated_at: None,
        }
    }
}

impl Serialize for IngestionProgress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("IngestionProgress", 9)?;
        s.serialize_field("month", &self.month.to_string())?;
        s.serialize_field("status", &self.status)?;
        s.serialize_field("records_fetched", &self.counts.fetched)?;
        s.serialize_field("records_inserted", &self.counts.inserted)?;
        s.serialize_field("records_skipped", &self.counts.skipped)?;
        s.serialize_field("error", &self.error)?;
        s.serialize_field("started_at", &self.started_at.as_ref().map(format_timestamp))?;
        s.serialize_field("completed_at", &self.completed_at.as_ref().map(format_timestamp))?;
        s.serialize_field("updated_at", &self.updated_at.as_ref().map(format_timestamp))?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use IngestionStatus::*;

    #[test]
    fn test_forward_transitions() {
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Complete));
        assert!(InProgress.can_transition_to(Failed));
        assert!(Failed.can_transition_to(InProgress));
    }

    #[test]
    fn test_complete_only_resets_to_pending() {
        assert!(Complete.can_transition_to(Pending));
        assert!(!Complete.can_transition_to(InProgress));
        assert!(!Complete.can_transition_to(Failed));
    }

    #[test]
    fn test_pending_cannot_skip_to_complete() {
        let month: Month = "2023-01".parse().unwrap();
        let err = Pending.transition(month, Complete).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [Pending, InProgress, Complete, Failed] {
            assert_eq!(status.as_str().parse::<IngestionStatus>().unwrap(), status);
        }
    }
}
