// src/dispatch/builder.rs
//! Work-unit builder: catalog → per-fetcher task lists.

use rand::seq::SliceRandom;
use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::types::Task;

/// Registry produced once per run and moved into pools and coordinators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkPlan {
    /// Fetcher name → tasks that fetcher must serve.
    pub queues: BTreeMap<String, Vec<Task>>,
    /// Eligible item id → number of tasks scheduled for it.
    pub expected: BTreeMap<String, usize>,
    /// Items that contribute no tasks and produce no resolution.
    pub skipped: Vec<String>,
}

impl WorkPlan {
    pub fn task_count(&self) -> usize {
        self.queues.values().map(Vec::len).sum()
    }

    pub fn item_count(&self) -> usize {
        self.expected.len()
    }

    /// All tasks, sorted; handy for comparing plans irrespective of queue order.
    pub fn sorted_tasks(&self) -> Vec<Task> {
        let mut all: Vec<Task> = self.queues.values().flatten().cloned().collect();
        all.sort();
        all
    }
}

/// Build the plan. Pure apart from the optional shuffle.
pub fn build(catalog: &Catalog, shuffle: bool) -> WorkPlan {
    let mut plan = WorkPlan::default();

    for item in catalog.items() {
        if !catalog.is_item_eligible(item) {
            plan.skipped.push(item.id.clone());
            continue;
        }
        let mut n = 0usize;
        for src in item.sources.iter().filter(|s| catalog.is_source_eligible(s)) {
            plan.queues.entry(src.fetcher.clone()).or_default().push(Task {
                item_id: item.id.clone(),
                url: src.url.clone(),
                fetcher: src.fetcher.clone(),
            });
            n += 1;
        }
        plan.expected.insert(item.id.clone(), n);
    }

    if shuffle {
        let mut rng = rand::rng();
        for tasks in plan.queues.values_mut() {
            tasks.shuffle(&mut rng);
        }
    }

    plan
}
