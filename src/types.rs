// src/types.rs
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

use crate::error::AttemptError;

/// A scraped quote. Values are kept verbatim as they appear on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub price: String,
    pub date: String,
}

/// One (item, source) pairing selected for execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Task {
    pub item_id: String,
    pub url: String,
    pub fetcher: String,
}

/// The dated result of executing one [`Task`].
#[derive(Debug, Clone)]
pub struct Outcome {
    pub fetcher: String,
    pub item_id: String,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: Result<Quote, AttemptError>,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn quote(&self) -> Option<&Quote> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&AttemptError> {
        self.result.as_ref().err()
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.elapsed().num_milliseconds()
    }
}

// Flat JSON view: quote fields on success, `error` text on failure.
impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let (price, date, error) = match &self.result {
            Ok(q) => (Some(q.price.as_str()), Some(q.date.as_str()), None),
            Err(e) => (None, None, Some(e.to_string())),
        };
        let mut st = ser.serialize_struct("Outcome", 9)?;
        st.serialize_field("fetcher", &self.fetcher)?;
        st.serialize_field("item_id", &self.item_id)?;
        st.serialize_field("url", &self.url)?;
        st.serialize_field("started_at", &self.started_at)?;
        st.serialize_field("finished_at", &self.finished_at)?;
        st.serialize_field("elapsed_ms", &self.elapsed_ms())?;
        st.serialize_field("price", &price)?;
        st.serialize_field("date", &date)?;
        st.serialize_field("error", &error)?;
        st.end()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (price, date, err) = match &self.result {
            Ok(q) => (q.price.as_str(), q.date.as_str(), String::new()),
            Err(e) => ("", "", e.to_string()),
        };
        writeln!(f, "Outcome {{")?;
        writeln!(f, "    fetcher:  {},", self.fetcher)?;
        writeln!(f, "    item:     {},", self.item_id)?;
        writeln!(f, "    url:      {},", self.url)?;
        writeln!(f, "    price:    {},", price)?;
        writeln!(f, "    date:     {},", date)?;
        writeln!(f, "    error:    {},", err)?;
        writeln!(f, "    started:  {},", self.started_at.to_rfc3339())?;
        writeln!(f, "    finished: {},", self.finished_at.to_rfc3339())?;
        writeln!(f, "    elapsed:  {}ms,", self.elapsed_ms())?;
        write!(f, "}}")
    }
}

/// The single terminal outcome chosen for an item.
///
/// `discarded` holds the failures that arrived before the decision, in
/// arrival order; they never influence the verdict but are kept for
/// diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub outcome: Outcome,
    pub discarded: Vec<Outcome>,
}

impl Resolution {
    pub fn item_id(&self) -> &str {
        &self.outcome.item_id
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn quote(&self) -> Option<&Quote> {
        self.outcome.quote()
    }

    pub fn error(&self) -> Option<&AttemptError> {
        self.outcome.error()
    }
}
