// src/testserver.rs
//! Local quote server for demos and end-to-end tests.
//!
//! `GET /{scraper}/{stock}` answers after a random delay with
//! `<ul><li>Price: <b>N</b></li><li>Date: <b>..</b></li></ul>` (N is the delay
//! in ms) or with HTTP 500 at the configured failure rate.
//! `GET /echo/{*path}` just reflects the request path.

use anyhow::{Context, Result};
use axum::{
    extract::{OriginalUri, Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, Fetcher, Item, Source};
use crate::scrape::parsers::ListItemParser;

#[derive(Debug, Clone)]
pub struct TestServerConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Probability in `[0.0, 1.0]` of answering 500.
    pub failure_rate: f64,
}

impl TestServerConfig {
    /// `failure_rate` clamped to `[0.0, 1.0]`; NaN counts as never failing.
    pub fn failure_probability(&self) -> f64 {
        if self.failure_rate.is_nan() {
            0.0
        } else {
            self.failure_rate.clamp(0.0, 1.0)
        }
    }
}

impl Default for TestServerConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 100,
            max_delay_ms: 3000,
            failure_rate: 0.0,
        }
    }
}

pub fn router(cfg: TestServerConfig) -> Router {
    Router::new()
        .route("/echo/{*path}", get(echo))
        .route("/{scraper}/{stock}", get(quote))
        .with_state(Arc::new(cfg))
}

async fn quote(
    State(cfg): State<Arc<TestServerConfig>>,
    Path((scraper, stock)): Path<(String, String)>,
) -> Response {
    // ThreadRng is not Send: draw everything before the first await.
    let (delay_ms, fail) = {
        let mut rng = rand::rng();
        let lo = cfg.min_delay_ms.min(cfg.max_delay_ms);
        let hi = cfg.min_delay_ms.max(cfg.max_delay_ms);
        let delay = if lo == hi { lo } else { rng.random_range(lo..=hi) };
        let fail = rng.random_bool(cfg.failure_probability());
        (delay, fail)
    };

    tokio::time::sleep(Duration::from_millis(delay_ms)).await;

    if fail {
        tracing::info!(target: "testserver", %scraper, %stock, delay_ms, "serving 500");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
    }

    let date = chrono::Utc::now().to_rfc3339();
    Html(format!(
        "<ul>\n  <li>Price: <b>{delay_ms}</b></li>\n  <li>Date: <b>{date}</b></li>\n</ul>"
    ))
    .into_response()
}

async fn echo(OriginalUri(uri): OriginalUri) -> String {
    tracing::info!(target: "testserver", %uri, "echo");
    format!("--> {uri}")
}

/// A server bound to an ephemeral localhost port.
pub struct TestServer {
    pub addr: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(cfg: TestServerConfig) -> Result<Self> {
        Self::start_with(cfg, Router::new()).await
    }

    /// Like `start`, with `extra` routes (e.g. `/metrics`) merged in.
    pub async fn start_with(cfg: TestServerConfig, extra: Router) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("binding test quote server")?;
        let addr = listener.local_addr().context("test server local addr")?;
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let app = router(cfg).merge(extra);
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                tracing::warn!(target: "testserver", error = ?e, "test server stopped");
            }
        });
        tracing::info!(target: "testserver", %addr, "test quote server listening");
        Ok(Self {
            addr,
            cancel,
            handle,
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// `num_stocks` items, each quoted by all `num_scrapers` single-worker
/// scrapers against `base_url`. Source order is rotated per stock so the
/// first source is not always the same scraper.
pub fn demo_catalog(num_stocks: usize, num_scrapers: usize, base_url: &str) -> Catalog {
    let parser = Arc::new(ListItemParser::default());
    let scraper_name = |n: usize| format!("scraper_{}", n + 1);

    let mut cat = Catalog::new();
    for n in 0..num_scrapers {
        cat = cat.with_fetcher(Fetcher::new(scraper_name(n), parser.clone()));
    }
    for j in 0..num_stocks {
        let suffix = j + 1;
        let mut item = Item::new(
            format!("id_{suffix}"),
            format!("name{suffix}"),
            format!("isin{suffix}"),
        );
        for n in 0..num_scrapers {
            let scraper = scraper_name((n + j) % num_scrapers);
            let url = format!("{base_url}/{scraper}/stock_{suffix}");
            item = item.with_source(Source::new(scraper, url));
        }
        cat = cat.with_item(item);
    }
    cat
}
