//! Per-bag timing collected during a run, and the reports derived from it.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

/// Timing of one executed wave item, in milliseconds relative to run start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub bag_id: Uuid,
    pub parent_bag_id: Option<Uuid>,
    pub init_ms: i64,
    pub duration_ms: i64,
}

impl TaskStats {
    pub fn end_ms(&self) -> i64 {
        self.init_ms + self.duration_ms
    }
}

/// Idle time along the lineage of the last bag to finish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CriticalPath {
    /// First entry is the gap between the last finish and the end of the run,
    /// then every gap between a bag's start and its predecessor's finish.
    pub delays: Vec<i64>,
    pub total: i64,
}

/// Outcome of one task manager run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Nodes counted across every bag.
    pub total: u64,
    pub elapsed: Duration,
    /// Control-loop batches processed.
    pub waves: u64,
    pub dispatched: u64,
    pub failed: u64,
    pub stats: Vec<TaskStats>,
}

impl RunReport {
    pub fn nodes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total as f64 / secs
        } else {
            0.0
        }
    }

    /// Sum of worker-side durations.
    pub fn actual_compute_time(&self) -> Duration {
        let ms: i64 = self.stats.iter().map(|s| s.duration_ms.max(0)).sum();
        Duration::from_millis(ms as u64)
    }

    /// Number of bags running at each of `bins` evenly spaced instants
    /// between run start and the last finish.
    pub fn concurrency_profile(&self, bins: usize) -> Vec<(f64, usize)> {
        let max_finish = self.stats.iter().map(TaskStats::end_ms).max().unwrap_or(0);
        if bins == 0 || max_finish <= 0 {
            return Vec::new();
        }
        let step = max_finish as f64 / bins as f64;
        (0..bins)
            .map(|i| {
                let t = i as f64 * step;
                let running = self
                    .stats
                    .iter()
                    .filter(|s| (s.init_ms as f64) < t && t < s.end_ms() as f64)
                    .count();
                (t, running)
            })
            .collect()
    }

    /// Walk back from the last finishing bag through the bags it was split
    /// from, collecting the time each one waited on its predecessor.
    pub fn critical_path_delay(&self) -> Option<CriticalPath> {
        let mut sorted: Vec<&TaskStats> = self.stats.iter().collect();
        sorted.sort_by_key(|s| std::cmp::Reverse(s.end_ms()));
        let last = sorted.first()?;

        let run_end = self.elapsed.as_millis() as i64;
        let mut delays = vec![run_end - last.end_ms()];
        let mut ptr = 0;
        let mut lineage = HashSet::from([last.bag_id]);
        for stats in &sorted {
            if !lineage.contains(&stats.bag_id) {
                continue;
            }
            let gap = ptr - stats.end_ms();
            if gap > 0 {
                delays.push(gap);
            }
            ptr = stats.init_ms;
            if let Some(parent) = stats.parent_bag_id {
                lineage.insert(parent);
            }
        }
        let total = delays.iter().sum();
        Some(CriticalPath { delays, total })
    }
}

/// `Depth: d, Performance: N/secs = X M nodes/s`, both figures cut to six
/// characters.
pub fn performance_line(depth: u32, total: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        total as f64 / secs / 1e6
    } else {
        0.0
    };
    format!(
        "Depth: {depth}, Performance: {total}/{} = {} M nodes/s",
        cut(&secs.to_string()),
        cut(&rate.to_string())
    )
}

fn cut(s: &str) -> &str {
    match s.char_indices().nth(6) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
