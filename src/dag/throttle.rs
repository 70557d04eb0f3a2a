// src/dag/throttle.rs

//! Per-category admission control.
//!
//! A category bundles a max-concurrent-jobs limit with a running count,
//! shared by every node naming that category. Nodes hold a [`CategoryId`]
//! index into the registry; only the graph engine mutates the counts.

use tracing::warn;

use crate::dag::node::CategoryId;

/// Sentinel for "no limit configured".
pub const NO_LIMIT: usize = usize::MAX;

#[derive(Debug, Clone)]
pub struct ThrottleInfo {
    pub name: String,
    pub max_jobs: usize,
    pub current_jobs: usize,
}

impl ThrottleInfo {
    pub fn is_set(&self) -> bool {
        self.max_jobs != NO_LIMIT
    }

    pub fn at_capacity(&self) -> bool {
        self.is_set() && self.current_jobs >= self.max_jobs
    }
}

#[derive(Debug, Default)]
pub struct ThrottleByCategory {
    categories: Vec<ThrottleInfo>,
}

impl ThrottleByCategory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or create a category; `max_jobs = None` leaves the limit
    /// unset (a later definition may set it).
    pub fn define(&mut self, name: &str, max_jobs: Option<usize>) -> CategoryId {
        if let Some(idx) = self.categories.iter().position(|c| c.name == name) {
            if let Some(max) = max_jobs {
                self.categories[idx].max_jobs = max;
            }
            return CategoryId(idx);
        }
        self.categories.push(ThrottleInfo {
            name: name.to_string(),
            max_jobs: max_jobs.unwrap_or(NO_LIMIT),
            current_jobs: 0,
        });
        CategoryId(self.categories.len() - 1)
    }

    pub fn get(&self, id: CategoryId) -> &ThrottleInfo {
        &self.categories[id.0]
    }

    pub fn incr(&mut self, id: CategoryId) {
        self.categories[id.0].current_jobs += 1;
    }

    pub fn decr(&mut self, id: CategoryId) {
        let info = &mut self.categories[id.0];
        if info.current_jobs == 0 {
            warn!(category = %info.name, "throttle count underflow; clamping to zero");
            return;
        }
        info.current_jobs -= 1;
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThrottleInfo> {
        self.categories.iter()
    }
}
