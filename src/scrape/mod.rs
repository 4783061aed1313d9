// src/scrape/mod.rs
//! Seams to the outside world: how a page is retrieved and how a quote is
//! pulled out of it. The dispatch engine only ever talks to these traits.

pub mod http;
pub mod parsers;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, ParseError};
use crate::types::Quote;

/// Retrieves a document. Implementations should give up promptly once
/// `scope` is cancelled; the engine also races every call against it.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, scope: &CancellationToken, url: &str) -> Result<String, FetchError>;
}

/// Extracts a quote from a retrieved document. Pure and synchronous.
pub trait QuoteParser: Send + Sync {
    fn parse(&self, document: &str) -> Result<Quote, ParseError>;

    fn name(&self) -> &'static str;
}
