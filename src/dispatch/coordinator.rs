// src/dispatch/coordinator.rs
//! Per-item coordinator: first success wins, the last failure is the
//! reported failure.
//!
//! States: `Pending` (no decision yet) → `Resolved` (decision forwarded, item
//! scope cancelled) → `Done` (every scheduled task has reported). The decision
//! is forwarded the moment it is taken; draining happens afterwards.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::{Outcome, Resolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Resolved,
    Done,
}

/// Winner selection for one outcome received while `Pending`.
/// `remaining` counts the tasks that have not reported yet, this one excluded.
pub fn accepts(outcome: &Outcome, remaining: usize) -> bool {
    outcome.is_success() || remaining == 0
}

pub(crate) struct Coordinator {
    pub item_id: String,
    pub expected: usize,
    pub scope: CancellationToken,
    pub root: CancellationToken,
    pub outcomes: mpsc::Receiver<Outcome>,
    pub resolutions: mpsc::Sender<Resolution>,
}

impl Coordinator {
    /// Drive the item to `Done`; returns the final state (useful in tests).
    pub async fn run(mut self) -> ItemState {
        let mut remaining = self.expected;
        let mut discarded: Vec<Outcome> = Vec::new();
        let mut state = if remaining == 0 {
            ItemState::Done
        } else {
            ItemState::Pending
        };

        while state != ItemState::Done {
            let next = tokio::select! {
                biased;
                _ = self.root.cancelled() => None,
                o = self.outcomes.recv() => o,
            };
            let Some(outcome) = next else {
                if state == ItemState::Pending && !self.root.is_cancelled() {
                    tracing::warn!(
                        target: "dispatch",
                        item = %self.item_id,
                        remaining,
                        "outcome channel closed before resolution"
                    );
                }
                break;
            };
            remaining = remaining.saturating_sub(1);

            match state {
                ItemState::Pending if accepts(&outcome, remaining) => {
                    // Siblings still queued or running are now useless.
                    self.scope.cancel();
                    tracing::debug!(
                        target: "dispatch",
                        item = %self.item_id,
                        fetcher = %outcome.fetcher,
                        success = outcome.is_success(),
                        discarded = discarded.len(),
                        remaining,
                        "item resolved"
                    );
                    let resolution = Resolution {
                        outcome,
                        discarded: std::mem::take(&mut discarded),
                    };
                    if self.resolutions.send(resolution).await.is_err() {
                        // Aggregator gone: the run was cancelled.
                        break;
                    }
                    state = ItemState::Resolved;
                }
                ItemState::Pending => discarded.push(outcome),
                _ => {
                    tracing::trace!(
                        target: "dispatch",
                        item = %self.item_id,
                        fetcher = %outcome.fetcher,
                        "late outcome drained"
                    );
                }
            }

            if remaining == 0 {
                state = ItemState::Done;
            }
        }

        self.scope.cancel();
        state
    }
}
