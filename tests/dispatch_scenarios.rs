// tests/dispatch_scenarios.rs
//
// Timing scenarios for the dispatch engine against a scripted transport.
// Each URL maps to (delay, reply); the transport records calls and attempts
// that were dropped before finishing (i.e. aborted by cancellation).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use quote_dispatch::scrape::parsers::ListItemParser;
use quote_dispatch::{
    AttemptError, Catalog, DispatchSettings, Dispatcher, FetchError, Fetcher, Item, PageFetcher,
    Source,
};

type Reply = Result<String, FetchError>;

#[derive(Default)]
struct Script {
    routes: HashMap<String, (Duration, Reply)>,
    calls: Mutex<Vec<String>>,
    aborted: Mutex<Vec<String>>,
}

impl Script {
    fn route(mut self, url: &str, delay_ms: u64, reply: Reply) -> Self {
        self.routes
            .insert(url.to_string(), (Duration::from_millis(delay_ms), reply));
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn aborted(&self) -> Vec<String> {
        self.aborted.lock().clone()
    }
}

/// Records the URL as aborted unless disarmed.
struct AbortGuard<'a> {
    url: &'a str,
    sink: &'a Mutex<Vec<String>>,
    armed: bool,
}

impl Drop for AbortGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.sink.lock().push(self.url.to_string());
        }
    }
}

#[async_trait]
impl PageFetcher for Script {
    async fn fetch(&self, _scope: &CancellationToken, url: &str) -> Result<String, FetchError> {
        self.calls.lock().push(url.to_string());
        let (delay, reply) = self
            .routes
            .get(url)
            .cloned()
            .unwrap_or((Duration::ZERO, Err(FetchError::Status { code: 404 })));
        let mut guard = AbortGuard {
            url,
            sink: &self.aborted,
            armed: true,
        };
        tokio::time::sleep(delay).await;
        guard.armed = false;
        reply
    }
}

fn page(price: &str) -> Reply {
    Ok(format!(
        "<ul><li>Price: <b>{price}</b></li><li>Date: <b>2024-05-01</b></li></ul>"
    ))
}

fn http500() -> Reply {
    Err(FetchError::Status { code: 500 })
}

fn settings() -> DispatchSettings {
    DispatchSettings {
        fetch_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_millis(500),
        shuffle_tasks: true,
    }
}

fn three_scraper_catalog() -> Catalog {
    let p = Arc::new(ListItemParser::default());
    Catalog::new()
        .with_fetcher(Fetcher::new("A", p.clone()))
        .with_fetcher(Fetcher::new("B", p.clone()))
        .with_fetcher(Fetcher::new("C", p))
        .with_item(
            Item::new("id_1", "name1", "isin1")
                .with_source(Source::new("A", "http://q/A/1"))
                .with_source(Source::new("B", "http://q/B/1"))
                .with_source(Source::new("C", "http://q/C/1")),
        )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fast_success_wins_and_slow_source_is_cancelled() {
    let script = Arc::new(
        Script::default()
            .route("http://q/A/1", 50, http500())
            .route("http://q/B/1", 80, page("100"))
            .route("http://q/C/1", 500, page("999")),
    );
    let d = Dispatcher::new(script.clone(), settings());

    let t0 = Instant::now();
    let mut run = d.dispatch(Arc::new(three_scraper_catalog()));
    assert_eq!(run.expected(), 1);

    let res = run.recv().await.expect("one resolution");
    let took = t0.elapsed();
    assert!(res.is_success());
    assert_eq!(res.quote().unwrap().price, "100");
    assert_eq!(res.outcome.fetcher, "B");
    assert_eq!(res.discarded.len(), 1);
    assert_eq!(res.discarded[0].fetcher, "A");
    assert!(took >= Duration::from_millis(70), "too early: {took:?}");
    assert!(took < Duration::from_millis(400), "waited for slow source: {took:?}");

    assert!(run.recv().await.is_none());
    run.finish().await;
    assert!(t0.elapsed() < Duration::from_millis(500));
    assert_eq!(script.aborted(), vec!["http://q/C/1".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn all_failures_resolve_after_last_reporter() {
    let script = Arc::new(
        Script::default()
            .route("http://q/A/1", 50, http500())
            .route("http://q/B/1", 80, http500())
            .route("http://q/C/1", 500, Err(FetchError::Transport("reset".into()))),
    );
    let d = Dispatcher::new(script.clone(), settings());

    let t0 = Instant::now();
    let res = d
        .dispatch(Arc::new(three_scraper_catalog()))
        .collect()
        .await;
    let took = t0.elapsed();

    assert_eq!(res.len(), 1);
    let r = &res[0];
    assert!(!r.is_success());
    assert_eq!(r.outcome.fetcher, "C");
    assert_eq!(
        r.error(),
        Some(&AttemptError::Fetch(FetchError::Transport("reset".into())))
    );
    assert_eq!(r.discarded.len(), 2);
    assert!(took >= Duration::from_millis(480), "resolved too early: {took:?}");
    assert!(script.aborted().is_empty());
}

#[tokio::test]
async fn sources_on_disabled_fetcher_make_item_ineligible() {
    let p = Arc::new(ListItemParser::default());
    let cat = Catalog::new()
        .with_fetcher(Fetcher::new("off", p).disabled())
        .with_item(
            Item::new("id_1", "n", "i")
                .with_source(Source::new("off", "http://q/off/1"))
                .with_source(Source::new("off", "http://q/off/2")),
        );
    let script = Arc::new(Script::default());
    let d = Dispatcher::new(script.clone(), settings());

    let run = d.dispatch(Arc::new(cat));
    assert_eq!(run.expected(), 0);
    assert!(run.collect().await.is_empty());
    assert!(script.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_resolution_per_eligible_item() {
    let p = Arc::new(ListItemParser::default());
    let mut cat = Catalog::new()
        .with_fetcher(Fetcher::new("A", p.clone()).with_concurrency(2))
        .with_fetcher(Fetcher::new("B", p.clone()))
        .with_fetcher(Fetcher::new("off", p).disabled());
    let mut script = Script::default();
    for i in 0..12 {
        let a = format!("http://q/A/{i}");
        let b = format!("http://q/B/{i}");
        // Odd items fail on A, every third item fails on B too.
        script = script
            .route(&a, 5 + i, if i % 2 == 1 { http500() } else { page("1") })
            .route(&b, 10, if i % 3 == 0 { http500() } else { page("2") });
        let mut item = Item::new(format!("id_{i}"), "n", "i")
            .with_source(Source::new("A", a))
            .with_source(Source::new("B", b))
            .with_source(Source::new("off", format!("http://q/off/{i}")));
        if i == 11 {
            item = item.disabled();
        }
        cat = cat.with_item(item);
    }
    cat = cat
        .with_item(Item::new("no_sources", "n", "i"))
        .with_item(Item::new("ghost", "n", "i").with_source(Source::new("missing", "http://q/x")));

    let d = Dispatcher::new(Arc::new(script), settings());
    let run = d.dispatch(Arc::new(cat));
    assert_eq!(run.expected(), 11);
    let res = run.collect().await;
    assert_eq!(res.len(), 11);

    let mut ids: Vec<&str> = res.iter().map(|r| r.item_id()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 11, "duplicate resolutions");

    for r in &res {
        let i: u64 = r.item_id().trim_start_matches("id_").parse().unwrap();
        let expect_ok = i % 2 == 0 || i % 3 != 0;
        assert_eq!(r.is_success(), expect_ok, "item {i}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn root_cancel_closes_stream_promptly() {
    let mut script = Script::default();
    let p = Arc::new(ListItemParser::default());
    let mut cat = Catalog::new().with_fetcher(Fetcher::new("A", p).with_concurrency(4));
    for i in 0..20 {
        let url = format!("http://q/A/{i}");
        script = script.route(&url, 5_000, page("1"));
        cat = cat.with_item(Item::new(format!("id_{i}"), "n", "i").with_source(Source::new("A", url)));
    }
    let script = Arc::new(script);
    let d = Dispatcher::new(script.clone(), settings());

    let parent = CancellationToken::new();
    let mut run = d.dispatch_with_cancel(Arc::new(cat), &parent);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let t0 = Instant::now();
    parent.cancel();
    assert!(run.recv().await.is_none());
    assert!(t0.elapsed() < Duration::from_secs(1));

    let summary = run.shutdown().await.expect("finished within grace");
    assert_eq!(summary.resolved, 0);
    assert!(summary.cancelled);

    // Only the first wave was ever started, and all of it was abandoned.
    let calls = script.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(script.aborted().len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dispatch_cancel_does_not_touch_parent() {
    let script = Arc::new(Script::default().route("http://q/A/1", 2_000, page("1")));
    let p = Arc::new(ListItemParser::default());
    let cat = Catalog::new()
        .with_fetcher(Fetcher::new("A", p))
        .with_item(Item::new("id_1", "n", "i").with_source(Source::new("A", "http://q/A/1")));
    let d = Dispatcher::new(script, settings());

    let parent = CancellationToken::new();
    let mut run = d.dispatch_with_cancel(Arc::new(cat), &parent);
    run.cancel();
    assert!(run.recv().await.is_none());
    assert!(run.cancellation_token().is_cancelled());
    assert!(!parent.is_cancelled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_fetcher_does_not_starve_the_others() {
    let p = Arc::new(ListItemParser::default());
    let mut cat = Catalog::new()
        .with_fetcher(Fetcher::new("slow", p.clone()))
        .with_fetcher(Fetcher::new("fast", p).with_concurrency(2));
    let mut script = Script::default();
    for i in 0..6 {
        let s = format!("http://q/slow/{i}");
        let f = format!("http://q/fast/{i}");
        script = script.route(&s, 2_000, page("s")).route(&f, 20, page("f"));
        cat = cat.with_item(
            Item::new(format!("id_{i}"), "n", "i")
                .with_source(Source::new("slow", s))
                .with_source(Source::new("fast", f)),
        );
    }
    let d = Dispatcher::new(Arc::new(script), settings());

    let t0 = Instant::now();
    let res = d.dispatch(Arc::new(cat)).collect().await;
    assert_eq!(res.len(), 6);
    assert!(res.iter().all(|r| r.quote().unwrap().price == "f"));
    assert!(t0.elapsed() < Duration::from_millis(1_000), "{:?}", t0.elapsed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hung_source_times_out_per_attempt() {
    let script = Arc::new(
        Script::default()
            .route("http://q/A/1", 10_000, page("late"))
            .route("http://q/B/1", 10_000, page("late")),
    );
    let p = Arc::new(ListItemParser::default());
    let cat = Catalog::new()
        .with_fetcher(Fetcher::new("A", p.clone()))
        .with_fetcher(Fetcher::new("B", p))
        .with_item(
            Item::new("id_1", "n", "i")
                .with_source(Source::new("A", "http://q/A/1"))
                .with_source(Source::new("B", "http://q/B/1")),
        );
    let d = Dispatcher::new(
        script,
        DispatchSettings {
            fetch_timeout: Duration::from_millis(100),
            ..settings()
        },
    );

    let res = d.dispatch(Arc::new(cat)).collect().await;
    assert_eq!(res.len(), 1);
    assert_eq!(res[0].error().unwrap().kind(), "timeout");
    assert_eq!(res[0].discarded[0].error().unwrap().kind(), "timeout");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_tasks_of_resolved_item_are_skipped() {
    let p = Arc::new(ListItemParser::default());
    let mut item = Item::new("id_1", "n", "i");
    let mut script = Script::default();
    for i in 0..5 {
        let url = format!("http://q/one/{i}");
        script = script.route(&url, 50, page(&i.to_string()));
        item = item.with_source(Source::new("one", url));
    }
    let cat = Catalog::new()
        .with_fetcher(Fetcher::new("one", p))
        .with_item(item);
    let script = Arc::new(script);
    let d = Dispatcher::new(
        script.clone(),
        DispatchSettings {
            shuffle_tasks: false,
            ..settings()
        },
    );

    let mut run = d.dispatch(Arc::new(cat));
    let res = run.recv().await.expect("one resolution");
    assert!(res.is_success());
    assert_eq!(res.outcome.url, "http://q/one/0");
    assert!(res.discarded.is_empty());

    // Stream closes only once every task, skipped ones included, has reported.
    assert!(run.recv().await.is_none());
    let summary = run.finish().await.expect("summary");
    assert_eq!(summary.resolved, 1);

    // The next task may have been dequeued before the scope was cancelled;
    // if so it was aborted, and nothing after it ever reached the transport.
    let calls = script.calls();
    assert!(calls.len() < 5, "queued tasks were fetched: {calls:?}");
    assert_eq!(calls[0], "http://q/one/0");
    for url in &calls[1..] {
        assert!(script.aborted().contains(url), "{url} ran to completion");
    }
}
