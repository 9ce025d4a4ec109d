//! Billing metadata carried in a function's log tail.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

static BILLED_DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Billed Duration: (\d+) ms").expect("static regex"));
static MEMORY_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Memory Size: (\d+) MB").expect("static regex"));

/// Billed duration and memory size of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationReport {
    pub billed_duration_ms: u64,
    pub memory_size_mb: u32,
}

impl InvocationReport {
    /// Parse the first `REPORT ` line of a log tail.
    ///
    /// Returns `None` when there is no such line or either field is missing.
    pub fn parse(log_tail: &str) -> Option<Self> {
        let line = log_tail.lines().find(|l| l.starts_with("REPORT "))?;
        let billed_duration_ms = BILLED_DURATION.captures(line)?.get(1)?.as_str().parse().ok()?;
        let memory_size_mb = MEMORY_SIZE.captures(line)?.get(1)?.as_str().parse().ok()?;
        Some(Self {
            billed_duration_ms,
            memory_size_mb,
        })
    }

    /// Build a report for a locally timed execution, billed per started millisecond.
    pub fn measured(elapsed: Duration, memory_size_mb: u32) -> Self {
        let micros = elapsed.as_micros() as u64;
        Self {
            billed_duration_ms: micros.div_ceil(1000).max(1),
            memory_size_mb,
        }
    }

    /// Render the log tail a hosted function returns.
    pub fn log_tail(&self, request_id: &str, elapsed: Duration) -> String {
        format!(
            "START RequestId: {request_id}\n\
             END RequestId: {request_id}\n\
             REPORT RequestId: {request_id}\tDuration: {:.2} ms\tBilled Duration: {} ms\tMemory Size: {} MB\n",
            elapsed.as_secs_f64() * 1000.0,
            self.billed_duration_ms,
            self.memory_size_mb,
        )
    }
}
