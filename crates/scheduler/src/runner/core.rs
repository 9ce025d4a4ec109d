use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use spillway_core::SpillwayConfig;
use spillway_wire::{Endpoint, FunctionRegistry, FunctionTransport, InProcessTransport, ZmqTransport};
use tokio::sync::Semaphore;
use tracing::info;
use uuid::Uuid;

use crate::cost::CostReport;
use crate::error::SchedulerError;
use crate::handle::Completion;
use crate::metrics::{Counters, SchedulerMetrics};

/// Routes work between a local worker pool and remote functions.
///
/// Construct one per run and pass it by reference to whatever submits work.
/// Dropping it releases the local pool and the remote runtime; remote
/// invocations already dispatched keep running on the function side.
pub struct HybridScheduler {
    pub(super) local_pool: rayon::ThreadPool,
    pub(super) local_workers: usize,
    /// Local jobs accepted but not yet started by a worker.
    pub(super) local_pending: Arc<AtomicUsize>,
    /// Runtime driving remote round trips. Taken on drop.
    pub(super) runtime: Option<tokio::runtime::Runtime>,
    pub(super) transport: Arc<dyn FunctionTransport>,
    pub(super) remote_slots: Arc<Semaphore>,
    pub(super) remote_pool_size: usize,
    pub(super) remote_timeout: Duration,
    pub(super) counters: Arc<Counters>,
    /// `None` when cost accounting is disabled.
    pub(super) cost: Option<Arc<Mutex<CostReport>>>,
    /// Completion flags of every handle not yet seen succeeding by `await_all`.
    pub(super) outstanding: Mutex<Vec<Completion>>,
    pub(super) prune_at: AtomicUsize,
    pub(super) shutdown: AtomicBool,
    pub(super) executor_id: String,
    pub(super) invocation_seq: AtomicU64,
}

impl HybridScheduler {
    /// Build the local pool and the remote runtime around `transport`.
    pub fn new(
        config: &SpillwayConfig,
        transport: Arc<dyn FunctionTransport>,
    ) -> Result<Self, SchedulerError> {
        let runtime = build_runtime(config)?;
        Self::assemble(config, runtime, transport)
    }

    /// Build a scheduler whose transport follows `remote.endpoint`.
    ///
    /// `in-process` runs remote invocations against `registry` inside this
    /// process; socket endpoints connect to a function host and ignore it.
    pub fn from_config(
        config: &SpillwayConfig,
        registry: FunctionRegistry,
    ) -> Result<Self, SchedulerError> {
        let endpoint = Endpoint::parse(&config.remote.endpoint).map_err(SchedulerError::Connect)?;
        let runtime = build_runtime(config)?;
        let transport: Arc<dyn FunctionTransport> = match endpoint {
            Endpoint::InProcess => Arc::new(InProcessTransport::new(
                registry,
                config.remote.memory_size_mb,
            )),
            // The client event loop is spawned on, and lives as long as, our runtime.
            socket => Arc::new(
                runtime
                    .block_on(ZmqTransport::connect(&socket, config.remote.timeout()))
                    .map_err(SchedulerError::Connect)?,
            ),
        };
        Self::assemble(config, runtime, transport)
    }

    fn assemble(
        config: &SpillwayConfig,
        runtime: tokio::runtime::Runtime,
        transport: Arc<dyn FunctionTransport>,
    ) -> Result<Self, SchedulerError> {
        let local_workers = config.scheduler.resolved_local_workers();
        let remote_pool_size = config.scheduler.remote_pool_size;

        let local_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(local_workers)
            .thread_name(|i| format!("spillway-local-{i}"))
            .build()
            .map_err(|e| SchedulerError::Runtime(format!("local pool: {e}")))?;

        let executor_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        info!(
            executor = %executor_id,
            local_workers,
            remote_pool_size,
            transport = transport.name(),
            "hybrid scheduler started"
        );

        Ok(Self {
            local_pool,
            local_workers,
            local_pending: Arc::new(AtomicUsize::new(0)),
            runtime: Some(runtime),
            transport,
            remote_slots: Arc::new(Semaphore::new(remote_pool_size)),
            remote_pool_size,
            remote_timeout: config.remote.timeout(),
            counters: Arc::new(Counters::default()),
            cost: config
                .cost
                .enabled
                .then(|| Arc::new(Mutex::new(CostReport::new(&config.cost)))),
            outstanding: Mutex::new(Vec::new()),
            prune_at: AtomicUsize::new(PRUNE_FLOOR),
            shutdown: AtomicBool::new(false),
            executor_id,
            invocation_seq: AtomicU64::new(0),
        })
    }

    /// Local jobs waiting for a worker. Input of the admission rule.
    pub fn local_queue_depth(&self) -> usize {
        self.local_pending.load(Ordering::SeqCst)
    }

    pub fn local_workers(&self) -> usize {
        self.local_workers
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        SchedulerMetrics {
            submitted_local: self.counters.submitted_local.load(Ordering::Relaxed),
            submitted_remote: self.counters.submitted_remote.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            local_queue_depth: self.local_queue_depth(),
            remote_in_use: self
                .remote_pool_size
                .saturating_sub(self.remote_slots.available_permits()),
            shut_down: self.is_shut_down(),
        }
    }

    /// Stop accepting submissions. Work already accepted keeps running.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            info!(executor = %self.executor_id, "hybrid scheduler shutdown requested");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Cost summary followed by the number of local executions.
    pub fn cost_report(&self) -> String {
        let rendered = match &self.cost {
            Some(cost) => lock(cost).render(),
            None => "Cost accounting disabled.".to_string(),
        };
        format!(
            "{rendered}\nLocal executions: {}",
            self.counters.submitted_local.load(Ordering::Relaxed)
        )
    }

    /// Log the cost report, one line per record.
    pub fn print_cost_report(&self) {
        for line in self.cost_report().lines() {
            info!("{line}");
        }
    }

    pub fn reset_cost_report(&self) {
        if let Some(cost) = &self.cost {
            lock(cost).reset();
        }
    }

    /// Snapshot of the accounting state, if enabled.
    pub fn cost_snapshot(&self) -> Option<CostReport> {
        self.cost.as_ref().map(|c| lock(c).clone())
    }

    pub(super) fn runtime_handle(&self) -> Result<tokio::runtime::Handle, SchedulerError> {
        self.runtime
            .as_ref()
            .map(|rt| rt.handle().clone())
            .ok_or(SchedulerError::Shutdown)
    }
}

pub(super) const PRUNE_FLOOR: usize = 1024;

fn build_runtime(config: &SpillwayConfig) -> Result<tokio::runtime::Runtime, SchedulerError> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.scheduler.resolved_local_workers().clamp(2, 8))
        .thread_name("spillway-remote")
        .enable_all()
        .build()
        .map_err(|e| SchedulerError::Runtime(format!("remote runtime: {e}")))
}

/// Lock a mutex, recovering the data if a holder panicked.
pub(super) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Drop for HybridScheduler {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
