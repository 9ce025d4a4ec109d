//! Adaptive work-queue control loop over a [`HybridScheduler`].

mod presplit;
mod run;
#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use spillway_core::ManagerConfig;
use spillway_scheduler::{ExecutionError, HybridScheduler};
use uuid::Uuid;

use crate::error::ManagerError;
use crate::job::BagOutcome;
use crate::policy::{self, WavePolicy};

/// Counters shared between the control loop and observers.
///
/// Only the control loop writes them.
#[derive(Debug, Default)]
pub struct Progress {
    in_flight: AtomicU64,
    total: AtomicU64,
}

impl Progress {
    /// Bags dispatched and not yet collected.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Nodes counted so far.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }
}

/// A finished wave item as it arrives on the completion queue.
struct Completion {
    bag_id: Uuid,
    parent: Option<Uuid>,
    result: Result<BagOutcome, ExecutionError>,
}

/// Keeps a tree search saturated: splits bags to the wanted parallelism,
/// ships them through the scheduler and folds returning counts into a total.
pub struct TaskManager<'a> {
    scheduler: &'a HybridScheduler,
    config: ManagerConfig,
    policy: Box<dyn WavePolicy + 'a>,
    progress: Arc<Progress>,
}

impl<'a> TaskManager<'a> {
    pub fn new(scheduler: &'a HybridScheduler, config: ManagerConfig) -> Result<Self, ManagerError> {
        check(&config)?;
        Ok(Self {
            scheduler,
            policy: policy::from_config(&config),
            config,
            progress: Arc::new(Progress::default()),
        })
    }

    /// Replace the wave policy derived from the config.
    pub fn with_policy(mut self, policy: impl WavePolicy + 'a) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }
}

fn check(config: &ManagerConfig) -> Result<(), ManagerError> {
    if config.depth == 0 {
        return Err(ManagerError::Config("depth must be at least 1".into()));
    }
    if config.drain.batch_size() == 0 {
        return Err(ManagerError::Config("poll batch must be at least 1".into()));
    }
    if let Some(presplit) = &config.presplit {
        if presplit.split_factor < 2 {
            return Err(ManagerError::Config("presplit split_factor must be at least 2".into()));
        }
    }
    Ok(())
}
