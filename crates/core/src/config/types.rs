use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration for a spillway run.
///
/// Parsed from `spillway.toml` with support for environment variable overrides.
/// Every section is optional; omitted sections take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpillwayConfig {
    /// Local pool and remote pool sizing.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Remote function endpoint and invocation limits.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Per-invocation cost accounting.
    #[serde(default)]
    pub cost: CostConfig,

    /// Adaptive task manager parameters.
    #[serde(default)]
    pub manager: ManagerConfig,
}

// ── Scheduler ───────────────────────────────────────────────────────

/// Pool sizing for the hybrid scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of local worker threads. 0 = available parallelism.
    #[serde(default = "default_local_workers")]
    pub local_workers: usize,

    /// Maximum number of concurrently outstanding remote invocations.
    #[serde(default = "default_remote_pool_size")]
    pub remote_pool_size: usize,
}

fn default_local_workers() -> usize { 0 }
fn default_remote_pool_size() -> usize { 2000 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            local_workers: default_local_workers(),
            remote_pool_size: default_remote_pool_size(),
        }
    }
}

impl SchedulerConfig {
    /// Resolve local worker count (0 means use available parallelism).
    pub fn resolved_local_workers(&self) -> usize {
        if self.local_workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.local_workers
        }
    }
}

// ── Remote ──────────────────────────────────────────────────────────

/// Where remote functions live and how long a caller waits for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// `in-process`, `tcp://host:port` or `ipc://name`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Caller-side wait limit per invocation. The function itself keeps running.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Memory size reported by hosted functions in their REPORT line.
    #[serde(default = "default_memory_size_mb")]
    pub memory_size_mb: u32,
}

fn default_endpoint() -> String { "in-process".into() }
fn default_timeout_secs() -> u64 { 900 }
fn default_memory_size_mb() -> u32 { 1769 }

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            memory_size_mb: default_memory_size_mb(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ── Cost ────────────────────────────────────────────────────────────

/// Pricing used to turn billed durations into a cost estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    #[serde(default = "default_cost_enabled")]
    pub enabled: bool,

    /// Dollars per request.
    #[serde(default = "default_request_cost")]
    pub request_cost_usd: f64,

    /// Dollars per GB-second of billed duration.
    #[serde(default = "default_gb_second_cost")]
    pub gb_second_cost_usd: f64,
}

fn default_cost_enabled() -> bool { true }
fn default_request_cost() -> f64 { 0.000_000_2 }
fn default_gb_second_cost() -> f64 { 0.000_016_666_7 }

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            enabled: default_cost_enabled(),
            request_cost_usd: default_request_cost(),
            gb_second_cost_usd: default_gb_second_cost(),
        }
    }
}

// ── Task manager ────────────────────────────────────────────────────

/// How many completed bags the control loop drains before redispatching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DrainPolicy {
    /// Resplit and redispatch after every single completed bag.
    One,
    /// Drain up to `n` completed bags, coalesce them together, then redispatch.
    Poll { n: usize },
}

impl DrainPolicy {
    /// Maximum number of completions collected per batch.
    pub fn batch_size(&self) -> usize {
        match self {
            Self::One => 1,
            Self::Poll { n } => *n,
        }
    }
}

/// How the control loop waits on the completion queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Spin on the queue with `try_recv`.
    Poll,
    /// Block on the queue until a completion arrives.
    Blocking,
}

/// Rounds of shallow local expansion before the first remote wave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreSplit {
    #[serde(default = "default_presplit_steps")]
    pub steps: usize,

    /// Stop pre-splitting once this many bags exist.
    #[serde(default = "default_target_bags")]
    pub target_bags: usize,

    /// Each surviving bag is resized to this many bags per round.
    #[serde(default = "default_split_factor")]
    pub split_factor: usize,

    /// Expansions applied to every bag per round.
    #[serde(default = "default_local_iterations")]
    pub local_iterations: u64,
}

fn default_presplit_steps() -> usize { 6 }
fn default_target_bags() -> usize { 2000 }
fn default_split_factor() -> usize { 5 }
fn default_local_iterations() -> u64 { 100 }

impl Default for PreSplit {
    fn default() -> Self {
        Self {
            steps: default_presplit_steps(),
            target_bags: default_target_bags(),
            split_factor: default_split_factor(),
            local_iterations: default_local_iterations(),
        }
    }
}

/// Condition on the in-flight count that fires a [`StepRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepTrigger {
    Above(u64),
    Below(u64),
}

impl StepTrigger {
    pub fn fires(&self, in_flight: u64) -> bool {
        match *self {
            Self::Above(n) => in_flight > n,
            Self::Below(n) => in_flight < n,
        }
    }
}

/// One-shot change of wave shape, applied in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRule {
    pub trigger: StepTrigger,
    pub parallelism: usize,
    pub iterations: u64,
}

/// Parameters of the adaptive work-queue control loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Root seed of the probabilistic tree.
    #[serde(default = "default_seed")]
    pub seed: u32,

    /// Tree depth.
    #[serde(default = "default_depth")]
    pub depth: u32,

    /// Desired number of bags dispatched per wave.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Expansion budget of one dispatched bag.
    #[serde(default = "default_iterations_per_wave")]
    pub iterations_per_wave: u64,

    #[serde(default = "default_drain")]
    pub drain: DrainPolicy,

    #[serde(default = "default_completion")]
    pub completion: CompletionMode,

    #[serde(default)]
    pub presplit: Option<PreSplit>,

    /// Wave-shape steps keyed on the in-flight count. Empty = fixed shape.
    #[serde(default)]
    pub steps: Vec<StepRule>,
}

fn default_seed() -> u32 { 19 }
fn default_depth() -> u32 { 13 }
fn default_parallelism() -> usize { 5 }
fn default_iterations_per_wave() -> u64 { 5_000_000 }
fn default_drain() -> DrainPolicy { DrainPolicy::One }
fn default_completion() -> CompletionMode { CompletionMode::Poll }

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            depth: default_depth(),
            parallelism: default_parallelism(),
            iterations_per_wave: default_iterations_per_wave(),
            drain: default_drain(),
            completion: default_completion(),
            presplit: None,
            steps: Vec::new(),
        }
    }
}
