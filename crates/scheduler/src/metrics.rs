use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    pub submitted_local: u64,
    pub submitted_remote: u64,
    pub completed: u64,
    pub failed: u64,
    /// Local jobs accepted but not yet picked up by a worker.
    pub local_queue_depth: usize,
    /// Remote invocation slots currently held.
    pub remote_in_use: usize,
    pub shut_down: bool,
}

impl SchedulerMetrics {
    pub fn submitted(&self) -> u64 {
        self.submitted_local + self.submitted_remote
    }

    pub fn outstanding(&self) -> u64 {
        self.submitted()
            .saturating_sub(self.completed + self.failed)
    }
}

/// Lock-free counters shared with workers and remote round trips.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub submitted_local: AtomicU64,
    pub submitted_remote: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
}

impl Counters {
    pub fn record_outcome(&self, ok: bool) {
        if ok {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics() {
        let m = SchedulerMetrics::default();
        assert_eq!(m.submitted(), 0);
        assert_eq!(m.outstanding(), 0);
        assert!(!m.shut_down);
    }

    #[test]
    fn outstanding_excludes_finished() {
        let m = SchedulerMetrics {
            submitted_local: 3,
            submitted_remote: 4,
            completed: 5,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(m.outstanding(), 1);
    }

    #[test]
    fn counters_split_outcomes() {
        let c = Counters::default();
        c.record_outcome(true);
        c.record_outcome(true);
        c.record_outcome(false);
        assert_eq!(c.completed.load(Ordering::Relaxed), 2);
        assert_eq!(c.failed.load(Ordering::Relaxed), 1);
    }
}
