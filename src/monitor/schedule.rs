use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};

/// Next-fire times for every armed monitor, ordered by due time.
///
/// Re-arming or cancelling bumps a per-monitor generation; heap entries with
/// an old generation are discarded lazily when they reach the top.
#[derive(Debug, Default)]
pub struct Schedule {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, u64, String)>>,
    armed: HashMap<String, (u64, DateTime<Utc>)>,
    next_generation: u64,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `id` to fire at `at`, replacing any previous arming.
    pub fn arm(&mut self, id: &str, at: DateTime<Utc>) {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.armed.insert(id.to_string(), (generation, at));
        self.heap.push(Reverse((at, generation, id.to_string())));
    }

    pub fn cancel(&mut self, id: &str) -> bool {
        self.armed.remove(id).is_some()
    }

    pub fn is_armed(&self, id: &str) -> bool {
        self.armed.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    /// Earliest live fire time.
    pub fn next_fire(&mut self) -> Option<DateTime<Utc>> {
        self.drop_stale();
        self.heap.peek().map(|Reverse((at, _, _))| *at)
    }

    /// Remove and return every monitor due at or before `now`. Returned
    /// monitors are disarmed; the caller re-arms them.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut due = Vec::new();
        loop {
            self.drop_stale();
            match self.heap.peek() {
                Some(Reverse((at, _, _))) if *at <= now => {}
                _ => break,
            }
            if let Some(Reverse((_, _, id))) = self.heap.pop() {
                self.armed.remove(&id);
                due.push(id);
            }
        }
        due
    }

    fn drop_stale(&mut self) {
        while let Some(Reverse((_, generation, id))) = self.heap.peek() {
            let live = self
                .armed
                .get(id)
                .is_some_and(|(current, _)| current == generation);
            if live {
                break;
            }
            self.heap.pop();
        }
    }
}
