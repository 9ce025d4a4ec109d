use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spillway_core::{
    CompletionMode, DrainPolicy, ManagerConfig, PreSplit, SpillwayConfig, StepRule, StepTrigger,
};
use spillway_scheduler::{Backend, HybridScheduler, SchedulerError};
use spillway_wire::{
    FunctionRegistry, FunctionTransport, InProcessTransport, InvokeResponse, RemoteTask, TaskError,
    WireError,
};

use crate::bag::sequential_count;
use crate::error::ManagerError;
use crate::job::register_functions;
use crate::policy::Wave;

use super::TaskManager;

fn scheduler() -> HybridScheduler {
    let mut config = SpillwayConfig::default();
    config.scheduler.local_workers = 2;
    config.scheduler.remote_pool_size = 64;
    let mut registry = FunctionRegistry::new();
    register_functions(&mut registry).unwrap();
    HybridScheduler::new(&config, Arc::new(InProcessTransport::new(registry, 1769))).unwrap()
}

/// Drops every second invocation on the floor.
struct Flaky {
    inner: InProcessTransport,
    calls: AtomicUsize,
}

#[async_trait]
impl FunctionTransport for Flaky {
    async fn invoke(&self, request: Vec<u8>) -> Result<InvokeResponse, WireError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
            return Err(WireError::Transport("connection reset".into()));
        }
        self.inner.invoke(request).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Keeps the local worker busy for a while.
#[derive(Serialize, Deserialize)]
struct Hold(u64);

impl RemoteTask for Hold {
    const KIND: &'static str = "test.hold";
    type Output = ();

    fn run(self) -> Result<(), TaskError> {
        std::thread::sleep(Duration::from_millis(self.0));
        Ok(())
    }
}

fn manager_config(depth: u32, parallelism: usize, iterations: u64) -> ManagerConfig {
    ManagerConfig {
        seed: 19,
        depth,
        parallelism,
        iterations_per_wave: iterations,
        ..ManagerConfig::default()
    }
}

#[test]
fn single_bag_matches_sequential_count() {
    let scheduler = scheduler();
    let mut manager = TaskManager::new(&scheduler, manager_config(7, 1, 1_000)).unwrap();
    let report = manager.run().unwrap();

    assert_eq!(report.total, 63914);
    assert_eq!(report.failed, 0);
    assert!(report.waves > 1);
    assert_eq!(report.stats.len() as u64, report.dispatched);
}

#[test]
fn parallel_waves_do_not_change_the_total() {
    let scheduler = scheduler();
    let mut manager = TaskManager::new(&scheduler, manager_config(8, 8, 2_000)).unwrap();
    let report = manager.run().unwrap();

    assert_eq!(report.total, sequential_count(19, 8));
    assert!(report.dispatched >= 8);
}

#[test]
fn poll_n_drains_batches() {
    let scheduler = scheduler();
    let mut config = manager_config(8, 6, 1_500);
    config.drain = DrainPolicy::Poll { n: 4 };
    let report = TaskManager::new(&scheduler, config).unwrap().run().unwrap();

    assert_eq!(report.total, 257042);
    assert!(report.waves <= report.dispatched);
}

#[test]
fn presplit_counts_local_rounds() {
    let scheduler = scheduler();
    let mut config = manager_config(8, 5, 5_000);
    config.presplit = Some(PreSplit {
        steps: 3,
        target_bags: 40,
        split_factor: 3,
        local_iterations: 20,
    });
    let report = TaskManager::new(&scheduler, config).unwrap().run().unwrap();

    assert_eq!(report.total, 257042);
}

#[test]
fn blocking_completion_gives_the_same_total() {
    let scheduler = scheduler();
    let mut config = manager_config(7, 4, 800);
    config.completion = CompletionMode::Blocking;
    let report = TaskManager::new(&scheduler, config).unwrap().run().unwrap();

    assert_eq!(report.total, 63914);
}

#[test]
fn stepped_config_still_counts_everything() {
    let scheduler = scheduler();
    let mut config = manager_config(7, 2, 3_000);
    config.steps = vec![
        StepRule {
            trigger: StepTrigger::Above(1),
            parallelism: 6,
            iterations: 500,
        },
        StepRule {
            trigger: StepTrigger::Below(3),
            parallelism: 1,
            iterations: 10_000,
        },
    ];
    let report = TaskManager::new(&scheduler, config).unwrap().run().unwrap();

    assert_eq!(report.total, 63914);
}

#[test]
fn custom_policy_sees_in_flight_counts() {
    let scheduler = scheduler();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let mut manager = TaskManager::new(&scheduler, manager_config(6, 1, 1))
        .unwrap()
        .with_policy(move |in_flight: u64| {
            record.lock().unwrap().push(in_flight);
            Wave {
                parallelism: 3,
                iterations: 700,
            }
        });
    let report = manager.run().unwrap();

    assert_eq!(report.total, 16000);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.first(), Some(&0));
    assert_eq!(seen.len() as u64, report.waves + 1);
}

#[test]
fn exhausted_root_dispatches_nothing() {
    let scheduler = scheduler();
    let report = TaskManager::new(&scheduler, manager_config(1, 5, 100))
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(report.total, 6);
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.waves, 0);
}

#[test]
fn progress_reflects_the_finished_run() {
    let scheduler = scheduler();
    let mut manager = TaskManager::new(&scheduler, manager_config(6, 3, 500)).unwrap();
    let progress = manager.progress();
    let report = manager.run().unwrap();

    assert_eq!(progress.total(), report.total);
    assert_eq!(progress.in_flight(), 0);
    assert!(report.critical_path_delay().is_some());
}

#[test]
fn shut_down_scheduler_rejects_the_first_wave() {
    let scheduler = scheduler();
    scheduler.shutdown();
    let mut manager = TaskManager::new(&scheduler, manager_config(6, 3, 500)).unwrap();
    let progress = manager.progress();

    let err = manager.run().unwrap_err();
    assert!(matches!(err, ManagerError::Scheduler(SchedulerError::Shutdown)));
    assert_eq!(progress.in_flight(), 0);
}

#[test]
fn invalid_config_is_rejected() {
    let scheduler = scheduler();
    assert!(matches!(
        TaskManager::new(&scheduler, manager_config(0, 1, 1)),
        Err(ManagerError::Config(_))
    ));

    let mut config = manager_config(5, 1, 1);
    config.drain = DrainPolicy::Poll { n: 0 };
    assert!(TaskManager::new(&scheduler, config).is_err());
}

#[test]
fn failed_remote_items_are_dropped_and_the_run_finishes() {
    let mut config = SpillwayConfig::default();
    config.scheduler.local_workers = 1;
    config.scheduler.remote_pool_size = 16;
    let mut registry = FunctionRegistry::new();
    register_functions(&mut registry).unwrap();
    let flaky = Arc::new(Flaky {
        inner: InProcessTransport::new(registry, 1769),
        calls: AtomicUsize::new(0),
    });
    let scheduler = HybridScheduler::new(&config, flaky.clone()).unwrap();

    // With the only worker busy, all but the first bag of the first wave spill.
    let hold = scheduler.submit_to(Backend::Local, Hold(500)).unwrap();
    while scheduler.local_queue_depth() > 0 {
        std::thread::yield_now();
    }

    let mut manager = TaskManager::new(&scheduler, manager_config(8, 8, 2_000)).unwrap();
    let progress = manager.progress();
    let report = manager.run().unwrap();
    hold.wait().unwrap();

    assert!(flaky.calls.load(Ordering::SeqCst) >= 4);
    assert!(report.failed >= 2);
    assert_eq!(report.stats.len() as u64, report.dispatched - report.failed);
    assert!(report.total < sequential_count(19, 8));
    assert_eq!(progress.in_flight(), 0);
    assert_eq!(progress.total(), report.total);
}
