// src/dispatch/aggregator.rs
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::Resolution;

/// Counts kept for the end-of-run summary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub expected: usize,
    pub resolved: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Fan-in of every coordinator's resolution onto the caller's stream.
/// Ends when all coordinators have dropped their senders, or on root cancel;
/// either way dropping `outbound` closes the caller's stream.
pub(crate) async fn run(
    mut inbound: mpsc::Receiver<Resolution>,
    outbound: mpsc::Sender<Resolution>,
    expected: usize,
    root: CancellationToken,
) -> RunSummary {
    let mut summary = RunSummary {
        expected,
        ..Default::default()
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = root.cancelled() => None,
            r = inbound.recv() => r,
        };
        let Some(resolution) = next else { break };

        summary.resolved += 1;
        let status = if resolution.is_success() {
            summary.succeeded += 1;
            "success"
        } else {
            summary.failed += 1;
            "failure"
        };
        counter!("dispatch_resolutions_total", "status" => status).increment(1);

        tracing::info!(
            target: "dispatch",
            item = %resolution.item_id(),
            fetcher = %resolution.outcome.fetcher,
            status,
            elapsed_ms = resolution.outcome.elapsed_ms(),
            "resolution"
        );

        let sent = tokio::select! {
            biased;
            _ = root.cancelled() => false,
            r = outbound.send(resolution) => r.is_ok(),
        };
        if !sent {
            break;
        }
    }

    summary.cancelled = root.is_cancelled() && summary.resolved < expected;
    gauge!("dispatch_last_run_ts").set(chrono::Utc::now().timestamp().max(0) as f64);
    tracing::info!(
        target: "dispatch",
        expected = summary.expected,
        resolved = summary.resolved,
        succeeded = summary.succeeded,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "dispatch run finished"
    );
    summary
}
