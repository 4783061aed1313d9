//! Quote dispatch demo: boots a local quote server, scrapes a synthetic
//! catalog through it and prints one resolution per stock.
//!
//! Environment:
//!   QUOTES_STOCKS / QUOTES_SCRAPERS   catalog size (default 10 x 3)
//!   QUOTES_FAILURE_RATE               share of 500 answers (default 0.6)
//!   QUOTES_MIN_DELAY_MS / QUOTES_MAX_DELAY_MS   server latency (default 100..3000)
//!   QUOTES_METRICS=1                  serve /metrics and print the series at exit
//!   plus the QUOTES_* settings read by `config::load_settings_default`.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use quote_dispatch::config::{load_settings_default, parse_bool};
use quote_dispatch::metrics::Metrics;
use quote_dispatch::scrape::http::HttpFetcher;
use quote_dispatch::testserver::{demo_catalog, TestServer, TestServerConfig};
use quote_dispatch::Dispatcher;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("quote_dispatch=info,dispatch=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{name}: {e}")),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = load_settings_default().context("loading dispatch settings")?;
    let num_stocks: usize = env_or("QUOTES_STOCKS", 10)?;
    let num_scrapers: usize = env_or("QUOTES_SCRAPERS", 3)?;
    let server_cfg = TestServerConfig {
        min_delay_ms: env_or("QUOTES_MIN_DELAY_MS", 100)?,
        max_delay_ms: env_or("QUOTES_MAX_DELAY_MS", 3000)?,
        failure_rate: env_or("QUOTES_FAILURE_RATE", 0.6)?,
    };
    if !(0.0..=1.0).contains(&server_cfg.failure_rate) {
        anyhow::bail!(
            "QUOTES_FAILURE_RATE: expected a value in [0, 1], got {}",
            server_cfg.failure_rate
        );
    }

    let metrics = match std::env::var("QUOTES_METRICS") {
        Ok(v) if parse_bool(&v) == Some(true) => Some(Metrics::init()?),
        _ => None,
    };

    let t0 = Instant::now();
    let extra = metrics.as_ref().map(Metrics::router).unwrap_or_default();
    let server = TestServer::start_with(server_cfg, extra).await?;
    if metrics.is_some() {
        tracing::info!("metrics at {}/metrics", server.url());
    }
    let catalog = Arc::new(demo_catalog(num_stocks, num_scrapers, &server.url()));

    let transport = HttpFetcher::new()?.with_timeout(settings.fetch_timeout);
    let dispatcher = Dispatcher::new(Arc::new(transport), settings);

    // Ctrl-C cancels the whole run.
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("ctrl-c received, cancelling run");
                shutdown.cancel();
            }
        });
    }

    let mut run = dispatcher.dispatch_with_cancel(catalog, &shutdown);
    let expected = run.expected();
    let mut n = 0usize;
    while let Some(res) = run.recv().await {
        n += 1;
        println!("[{n}/{expected}] {}", res.outcome);
        for d in &res.discarded {
            println!(
                "    discarded {} after {}ms: {}",
                d.fetcher,
                d.elapsed_ms(),
                d.error().map(ToString::to_string).unwrap_or_default()
            );
        }
    }

    let summary = if shutdown.is_cancelled() {
        run.shutdown().await
    } else {
        run.finish().await
    };
    if let Some(s) = summary {
        println!(
            "resolved {}/{} (ok {}, failed {}){}",
            s.resolved,
            s.expected,
            s.succeeded,
            s.failed,
            if s.cancelled { " - cancelled" } else { "" }
        );
    }
    println!("Total elapsed = {:?}", t0.elapsed());
    if let Some(m) = &metrics {
        print!("{}", m.render());
    }

    server.stop().await;
    Ok(())
}
