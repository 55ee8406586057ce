use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::task::{Category, Task};

/// Counts shown on the statistics screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub overdue: usize,
    /// Incomplete and not overdue.
    pub pending: usize,
    pub by_category: BTreeMap<Category, usize>,
}

impl TaskStats {
    pub fn compute(tasks: &[Task], now: DateTime<Utc>) -> Self {
        let mut stats = Self {
            total: tasks.len(),
            ..Self::default()
        };
        for task in tasks {
            if task.is_completed {
                stats.completed += 1;
            } else if task.is_overdue(now) {
                stats.overdue += 1;
            }
            *stats.by_category.entry(task.category.clone()).or_default() += 1;
        }
        stats.pending = stats.total - stats.completed - stats.overdue;
        stats
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Share of the total, in whole percent, rounded to nearest.
    pub fn percent(&self, count: usize) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((count as f64 / self.total as f64) * 100.0).round() as u32
    }
}
