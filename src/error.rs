//! Error taxonomy shared by the query engine, the aggregation engine and the
//! ingestion job.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or out-of-domain request parameter.
    #[error("invalid parameter '{param}': {message}")]
    Validation { param: String, message: String },

    #[error("{0} not found")]
    NotFound(String),

    /// The external archive was unreachable or returned malformed data.
    #[error("archive fetch failed: {0}")]
    ArchiveFetch(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("illegal ingestion transition for {month}: {from} -> {to}")]
    InvalidTransition {
        month: String,
        from: String,
        to: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(param: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            param: param.into(),
            message: message.into(),
        }
    }

    /// HTTP-equivalent status for callers of the API layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation { .. } => 400,
            Error::NotFound(_) => 404,
            Error::ArchiveFetch(_) => 502,
            Error::Store(_)
            | Error::InvalidTransition { .. }
            | Error::Io(_)
            | Error::Json(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
