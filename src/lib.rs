// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod scrape;
pub mod testserver;
pub mod types;

// ---- Re-exports for stable public API ----
pub use crate::catalog::{Catalog, Fetcher, Item, Source};
pub use crate::config::DispatchSettings;
pub use crate::dispatch::{Dispatch, Dispatcher, RunSummary};
pub use crate::error::{AttemptError, FetchError, ParseError};
pub use crate::scrape::{PageFetcher, QuoteParser};
pub use crate::types::{Outcome, Quote, Resolution, Task};
