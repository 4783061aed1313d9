// src/error.rs
//! Failure classification for a single fetch attempt.
//!
//! Every failure ends up as data inside an [`Outcome`](crate::types::Outcome);
//! nothing here is ever returned across the dispatch boundary as a fault.

use std::time::Duration;
use thiserror::Error;

/// Transport-level failure while retrieving a page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP status {code}")]
    Status { code: u16 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request cancelled")]
    Cancelled,
}

/// The document was retrieved but the quote could not be extracted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Why an attempt produced no quote.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Fetch(FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("fetcher {fetcher:?} is disabled")]
    Disabled { fetcher: String },
    #[error("attempt cancelled")]
    Cancelled,
}

impl From<FetchError> for AttemptError {
    fn from(e: FetchError) -> Self {
        match e {
            // A transport that noticed the scope itself is reported like any other cancellation.
            FetchError::Cancelled => AttemptError::Cancelled,
            other => AttemptError::Fetch(other),
        }
    }
}

impl AttemptError {
    /// Short, stable label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptError::Fetch(FetchError::Timeout(_)) => "timeout",
            AttemptError::Fetch(_) => "fetch",
            AttemptError::Parse(_) => "parse",
            AttemptError::Disabled { .. } => "disabled",
            AttemptError::Cancelled => "cancelled",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AttemptError::Cancelled)
    }
}
