// src/dispatch/mod.rs
//! # Dispatch engine
//!
//! Catalog → work-unit builder → per-fetcher queues → fetcher pools →
//! per-item coordinators → aggregator → caller.
//!
//! A run lives under one root `CancellationToken`; every item gets a child
//! token. Resolving an item cancels its child, cancelling the root cascades
//! to every item and stops all pools.

pub mod aggregator;
pub mod builder;
pub mod coordinator;
pub mod pool;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::config::DispatchSettings;
use crate::error::AttemptError;
use crate::scrape::PageFetcher;
use crate::types::{Outcome, Resolution, Task};

pub use aggregator::RunSummary;
pub use builder::WorkPlan;
pub use coordinator::ItemState;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "dispatch_attempts_total",
            "Fetch attempts by fetcher and status."
        );
        describe_histogram!(
            "dispatch_attempt_ms",
            "Fetch+parse attempt duration in milliseconds."
        );
        describe_counter!(
            "dispatch_resolutions_total",
            "Item resolutions by status."
        );
        describe_counter!(
            "dispatch_skipped_items_total",
            "Items skipped because no source was eligible."
        );
        describe_gauge!(
            "dispatch_last_run_ts",
            "Unix ts when a dispatch run last finished."
        );
    });
}

/// Entry point: holds the transport and settings, starts runs.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn PageFetcher>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn PageFetcher>, settings: DispatchSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Start a run under a fresh root scope. Must be called inside a Tokio runtime.
    pub fn dispatch(&self, catalog: Arc<Catalog>) -> Dispatch {
        self.dispatch_with_cancel(catalog, &CancellationToken::new())
    }

    /// Start a run whose root scope is a child of `parent`: cancelling
    /// `parent` shuts the run down, while `Dispatch::cancel` leaves `parent` alone.
    pub fn dispatch_with_cancel(&self, catalog: Arc<Catalog>, parent: &CancellationToken) -> Dispatch {
        ensure_metrics_described();

        let root = parent.child_token();
        let plan = builder::build(&catalog, self.settings.shuffle_tasks);
        let expected = plan.item_count();

        if !plan.skipped.is_empty() {
            counter!("dispatch_skipped_items_total").increment(plan.skipped.len() as u64);
            tracing::debug!(target: "dispatch", skipped = ?plan.skipped, "items without eligible sources");
        }
        tracing::info!(
            target: "dispatch",
            items = expected,
            tasks = plan.task_count(),
            fetchers = plan.queues.len(),
            "dispatch run starting"
        );

        let (res_tx, res_rx) = mpsc::channel(expected.max(1));
        let (out_tx, out_rx) = mpsc::channel(expected.max(1));
        let mut tasks = JoinSet::new();

        // One coordinator per eligible item, each owning its scope and outcome receiver.
        let mut bindings: BTreeMap<String, (CancellationToken, mpsc::Sender<Outcome>)> =
            BTreeMap::new();
        for (item_id, &n) in &plan.expected {
            let scope = root.child_token();
            let (tx, rx) = mpsc::channel(n.max(1));
            bindings.insert(item_id.clone(), (scope.clone(), tx));
            tasks.spawn({
                let c = coordinator::Coordinator {
                    item_id: item_id.clone(),
                    expected: n,
                    scope,
                    root: root.clone(),
                    outcomes: rx,
                    resolutions: res_tx.clone(),
                };
                async move {
                    c.run().await;
                }
            });
        }
        drop(res_tx);

        let ctx = pool::PoolContext {
            transport: Arc::clone(&self.transport),
            fetch_timeout: self.settings.fetch_timeout,
            root: root.clone(),
        };
        let WorkPlan { queues, .. } = plan;
        for (name, queue) in queues {
            // Builder only emits tasks for fetchers that exist and are enabled.
            let Some(fetcher) = catalog.fetcher(&name).cloned() else {
                continue;
            };
            let jobs = queue
                .into_iter()
                .filter_map(|task| {
                    let (scope, tx) = bindings.get(&task.item_id)?;
                    Some(pool::Job {
                        scope: scope.clone(),
                        outcomes: tx.clone(),
                        task,
                    })
                })
                .collect();
            pool::spawn_pool(&mut tasks, fetcher, jobs, ctx.clone());
        }
        // Only jobs hold outcome senders from here on: an item's channel
        // closes once all of its jobs are consumed or dropped.
        drop(bindings);

        let aggregator = tokio::spawn(aggregator::run(res_rx, out_tx, expected, root.clone()));

        Dispatch {
            resolutions: out_rx,
            root,
            tasks,
            aggregator: Some(aggregator),
            expected,
            grace: self.settings.shutdown_grace,
        }
    }

    /// Race every enabled source of one item directly, without pools.
    ///
    /// Sources whose fetcher is missing or disabled report a `Disabled`
    /// outcome without any I/O. The usual winner rule applies; remaining
    /// attempts are cancelled as soon as the item resolves. Returns `None`
    /// for an unknown item, an item with no enabled source, or when `scope`
    /// is cancelled first.
    pub async fn race_item(
        &self,
        catalog: &Catalog,
        item_id: &str,
        scope: &CancellationToken,
    ) -> Option<Resolution> {
        let item = catalog.item(item_id)?;
        let sources: Vec<_> = item.sources.iter().filter(|s| !s.disabled).collect();
        if item.disabled || sources.is_empty() {
            return None;
        }

        let item_scope = scope.child_token();
        let (tx, rx) = mpsc::channel(sources.len());
        let (res_tx, mut res_rx) = mpsc::channel(1);
        let mut set = JoinSet::new();

        for src in sources {
            let task = Task {
                item_id: item.id.clone(),
                url: src.url.clone(),
                fetcher: src.fetcher.clone(),
            };
            let fetcher = catalog.fetcher(&src.fetcher).cloned();
            let transport = Arc::clone(&self.transport);
            let timeout = self.settings.fetch_timeout;
            let scope = item_scope.clone();
            let tx = tx.clone();
            set.spawn(async move {
                let outcome = match fetcher {
                    Some(f) => pool::attempt(&f, &task, &scope, transport.as_ref(), timeout).await,
                    None => {
                        let fetcher = task.fetcher.clone();
                        pool::synthetic(&task, AttemptError::Disabled { fetcher })
                    }
                };
                pool::record(&outcome);
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        let c = coordinator::Coordinator {
            item_id: item.id.clone(),
            expected: set.len(),
            scope: item_scope.clone(),
            root: scope.clone(),
            outcomes: rx,
            resolutions: res_tx,
        };
        set.spawn(async move {
            c.run().await;
        });

        let resolution = res_rx.recv().await;
        item_scope.cancel();
        resolution
    }
}

/// Handle on a running dispatch. Resolutions arrive in completion order;
/// `recv` returns `None` once every eligible item has resolved or the run
/// was cancelled. Dropping the handle cancels the run.
pub struct Dispatch {
    resolutions: mpsc::Receiver<Resolution>,
    root: CancellationToken,
    tasks: JoinSet<()>,
    aggregator: Option<JoinHandle<RunSummary>>,
    expected: usize,
    grace: Duration,
}

impl Dispatch {
    /// Number of eligible items, i.e. resolutions a complete run produces.
    pub fn expected(&self) -> usize {
        self.expected
    }

    pub async fn recv(&mut self) -> Option<Resolution> {
        self.resolutions.recv().await
    }

    /// Cancel the whole run: every item scope and every pool.
    pub fn cancel(&self) {
        self.root.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Drain the stream until it closes.
    pub async fn collect(mut self) -> Vec<Resolution> {
        let mut out = Vec::with_capacity(self.expected);
        while let Some(r) = self.recv().await {
            out.push(r);
        }
        out
    }

    /// Cancel the run and wait up to the configured grace period for
    /// workers and coordinators to wind down; stragglers are aborted.
    /// Returns the aggregator's summary when it finished in time.
    pub async fn shutdown(mut self) -> Option<RunSummary> {
        self.root.cancel();
        let grace = self.grace;
        let tasks = &mut self.tasks;
        let aggregator = self.aggregator.take();

        let waited = tokio::time::timeout(grace, async move {
            while tasks.join_next().await.is_some() {}
            match aggregator {
                Some(h) => h.await.ok(),
                None => None,
            }
        })
        .await;

        match waited {
            Ok(summary) => summary,
            Err(_) => {
                tracing::warn!(target: "dispatch", ?grace, "shutdown grace elapsed; aborting remaining tasks");
                self.tasks.abort_all();
                None
            }
        }
    }

    /// Wait for the run to finish on its own and return its summary.
    /// Resolutions not yet received are discarded.
    pub async fn finish(mut self) -> Option<RunSummary> {
        while self.resolutions.recv().await.is_some() {}
        while self.tasks.join_next().await.is_some() {}
        match self.aggregator.take() {
            Some(h) => h.await.ok(),
            None => None,
        }
    }
}

impl Drop for Dispatch {
    fn drop(&mut self) {
        self.root.cancel();
        if let Some(h) = &self.aggregator {
            h.abort();
        }
    }
}
