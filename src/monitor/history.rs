use std::collections::VecDeque;

use super::Check;
use crate::config::CHECK_HISTORY_CAPACITY;

/// Fixed-capacity check history. Oldest entries are evicted first.
#[derive(Debug, Clone)]
pub struct CheckHistory {
    checks: VecDeque<Check>,
    capacity: usize,
}

impl CheckHistory {
    pub fn new() -> Self {
        Self::with_capacity(CHECK_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            checks: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, check: Check) {
        if self.checks.len() >= self.capacity {
            self.checks.pop_front();
        }
        self.checks.push_back(check);
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn latest(&self) -> Option<&Check> {
        self.checks.back()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Check> {
        self.checks.iter()
    }

    /// Up to `limit` most recent checks, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Check> {
        self.checks.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for CheckHistory {
    fn default() -> Self {
        Self::new()
    }
}
