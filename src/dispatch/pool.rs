// src/dispatch/pool.rs
//! Fetcher pool: a fixed number of long-lived workers per fetcher, all
//! draining the same queue. At most `Fetcher::workers()` attempts of one
//! fetcher are ever in flight, because each worker runs one at a time.

use chrono::Utc;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::catalog::Fetcher;
use crate::error::{AttemptError, FetchError};
use crate::scrape::PageFetcher;
use crate::types::{Outcome, Task};

/// A task bound to its item's scope and outcome channel.
pub(crate) struct Job {
    pub task: Task,
    pub scope: CancellationToken,
    pub outcomes: mpsc::Sender<Outcome>,
}

/// What every worker of a run shares.
#[derive(Clone)]
pub(crate) struct PoolContext {
    pub transport: Arc<dyn PageFetcher>,
    pub fetch_timeout: Duration,
    pub root: CancellationToken,
}

/// Start `fetcher.workers()` workers over `jobs`. The queue is filled and
/// closed before any worker starts, so workers exit once it runs dry.
pub(crate) fn spawn_pool(set: &mut JoinSet<()>, fetcher: Fetcher, jobs: Vec<Job>, ctx: PoolContext) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queued = jobs.len();
    for job in jobs {
        // Receiver is alive right here, send cannot fail.
        let _ = tx.send(job);
    }
    drop(tx);

    let workers = fetcher.workers().min(queued.max(1));
    tracing::debug!(
        target: "dispatch",
        fetcher = %fetcher.name,
        workers,
        queued,
        "starting fetcher pool"
    );

    let queue = Arc::new(Mutex::new(rx));
    let fetcher = Arc::new(fetcher);
    for worker in 0..workers {
        set.spawn(run_worker(
            worker,
            Arc::clone(&fetcher),
            Arc::clone(&queue),
            ctx.clone(),
        ));
    }
}

async fn run_worker(
    worker: usize,
    fetcher: Arc<Fetcher>,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    ctx: PoolContext,
) {
    loop {
        let next = {
            let mut rx = queue.lock().await;
            tokio::select! {
                biased;
                _ = ctx.root.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = next else { break };

        let outcome = if job.scope.is_cancelled() {
            skipped(&job.task)
        } else {
            attempt(
                &fetcher,
                &job.task,
                &job.scope,
                ctx.transport.as_ref(),
                ctx.fetch_timeout,
            )
            .await
        };
        record(&outcome);

        // The coordinator may already be gone (run cancelled); nothing to report to then.
        let _ = job.outcomes.send(outcome).await;
    }
    tracing::trace!(target: "dispatch", fetcher = %fetcher.name, worker, "worker done");
}

/// Execute one task: fetch then parse, bounded by `timeout` and aborted as
/// soon as `scope` is cancelled. Always yields exactly one outcome.
pub async fn attempt(
    fetcher: &Fetcher,
    task: &Task,
    scope: &CancellationToken,
    transport: &dyn PageFetcher,
    timeout: Duration,
) -> Outcome {
    let started_at = Utc::now();

    let result = if fetcher.disabled {
        Err(AttemptError::Disabled {
            fetcher: fetcher.name.clone(),
        })
    } else {
        tokio::select! {
            biased;
            _ = scope.cancelled() => Err(AttemptError::Cancelled),
            res = tokio::time::timeout(timeout, transport.fetch(scope, &task.url)) => match res {
                Err(_) => Err(FetchError::Timeout(timeout).into()),
                Ok(Err(e)) => Err(e.into()),
                Ok(Ok(doc)) => fetcher.parser.parse(&doc).map_err(AttemptError::from),
            },
        }
    };

    Outcome {
        fetcher: task.fetcher.clone(),
        item_id: task.item_id.clone(),
        url: task.url.clone(),
        started_at,
        finished_at: Utc::now(),
        result,
    }
}

/// Outcome for a queued task whose item was already resolved.
pub(crate) fn skipped(task: &Task) -> Outcome {
    synthetic(task, AttemptError::Cancelled)
}

/// Outcome produced without any I/O.
pub(crate) fn synthetic(task: &Task, err: AttemptError) -> Outcome {
    let now = Utc::now();
    Outcome {
        fetcher: task.fetcher.clone(),
        item_id: task.item_id.clone(),
        url: task.url.clone(),
        started_at: now,
        finished_at: now,
        result: Err(err),
    }
}

pub(crate) fn record(outcome: &Outcome) {
    let status = match &outcome.result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    counter!(
        "dispatch_attempts_total",
        "fetcher" => outcome.fetcher.clone(),
        "status" => status
    )
    .increment(1);
    if status != "cancelled" {
        histogram!("dispatch_attempt_ms").record(outcome.elapsed_ms().max(0) as f64);
    }
    tracing::debug!(
        target: "dispatch",
        fetcher = %outcome.fetcher,
        item = %outcome.item_id,
        status,
        elapsed_ms = outcome.elapsed_ms(),
        "attempt finished"
    );
}
