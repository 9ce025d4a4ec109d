//! Running cost estimate of remote invocations.

use spillway_core::CostConfig;
use spillway_wire::InvocationReport;

/// Billed durations of every accounted invocation, plus the configured
/// function memory size.
#[derive(Debug, Clone)]
pub struct CostReport {
    billed_ms: Vec<u64>,
    memory_size_mb: Option<u32>,
    request_cost_usd: f64,
    gb_second_cost_usd: f64,
}

/// Dollar breakdown of a [`CostReport`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub requests: f64,
    pub execution: f64,
    pub total: f64,
}

impl CostReport {
    pub fn new(config: &CostConfig) -> Self {
        Self {
            billed_ms: Vec::new(),
            memory_size_mb: None,
            request_cost_usd: config.request_cost_usd,
            gb_second_cost_usd: config.gb_second_cost_usd,
        }
    }

    /// Account one invocation. The first memory size seen sticks.
    pub fn record(&mut self, report: InvocationReport) {
        self.billed_ms.push(report.billed_duration_ms);
        if self.memory_size_mb.is_none() {
            self.memory_size_mb = Some(report.memory_size_mb);
        }
    }

    pub fn executions(&self) -> usize {
        self.billed_ms.len()
    }

    pub fn total_billed_ms(&self) -> u64 {
        self.billed_ms.iter().sum()
    }

    pub fn memory_size_mb(&self) -> Option<u32> {
        self.memory_size_mb
    }

    /// `None` without a known memory size or any accounted invocation.
    pub fn estimate(&self) -> Option<CostEstimate> {
        let memory = self.memory_size_mb.filter(|m| *m > 0)?;
        if self.billed_ms.is_empty() {
            return None;
        }
        let requests = self.billed_ms.len() as f64 * self.request_cost_usd;
        let gb_seconds = self.total_billed_ms() as f64 / 1000.0 * f64::from(memory) / 1024.0;
        let execution = gb_seconds * self.gb_second_cost_usd;
        Some(CostEstimate {
            requests,
            execution,
            total: requests + execution,
        })
    }

    pub fn render(&self) -> String {
        match (self.estimate(), self.memory_size_mb) {
            (Some(cost), Some(memory)) => format!(
                "Total executions {}\tMem. Size {} MB\tTotal Billed Duration {} ms\tCost {:.4} + {:.4} = {:.2} $",
                self.executions(),
                memory,
                self.total_billed_ms(),
                cost.requests,
                cost.execution,
                cost.total,
            ),
            _ => "Could not compute the Cost report! Insufficient data.".to_string(),
        }
    }

    pub fn reset(&mut self) {
        self.billed_ms.clear();
        self.memory_size_mb = None;
    }
}
