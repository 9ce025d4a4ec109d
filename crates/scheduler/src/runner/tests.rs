use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spillway_core::SpillwayConfig;
use spillway_wire::{
    FunctionRegistry, FunctionTransport, InProcessTransport, InvokeResponse, RemoteTask,
    TaskError, WireError,
};

use crate::error::{ExecutionError, SchedulerError};
use crate::iterative::{Finalizer, IterativeBody, NoFinalizer, RegisterIterative};
use crate::runner::HybridScheduler;
use crate::types::Backend;

const WAIT: Duration = Duration::from_secs(10);

#[derive(Serialize, Deserialize)]
struct Add(u64, u64);

impl RemoteTask for Add {
    const KIND: &'static str = "test.add";
    type Output = u64;

    fn run(self) -> Result<u64, TaskError> {
        Ok(self.0 + self.1)
    }
}

#[derive(Serialize, Deserialize)]
struct Fail;

impl RemoteTask for Fail {
    const KIND: &'static str = "test.fail";
    type Output = ();

    fn run(self) -> Result<(), TaskError> {
        Err(TaskError::new("deliberate failure"))
    }
}

#[derive(Serialize, Deserialize)]
struct Panic;

impl RemoteTask for Panic {
    const KIND: &'static str = "test.panic";
    type Output = ();

    fn run(self) -> Result<(), TaskError> {
        panic!("worker blew up")
    }
}

#[derive(Serialize, Deserialize)]
struct Sleep(u64);

impl RemoteTask for Sleep {
    const KIND: &'static str = "test.sleep";
    type Output = ();

    fn run(self) -> Result<(), TaskError> {
        std::thread::sleep(Duration::from_millis(self.0));
        Ok(())
    }
}

static BLOCKER_STARTED: AtomicBool = AtomicBool::new(false);
static BLOCKER_RELEASE: AtomicBool = AtomicBool::new(false);

/// Holds its worker until released.
#[derive(Serialize, Deserialize)]
struct Blocker;

impl RemoteTask for Blocker {
    const KIND: &'static str = "test.blocker";
    type Output = ();

    fn run(self) -> Result<(), TaskError> {
        BLOCKER_STARTED.store(true, Ordering::SeqCst);
        while !BLOCKER_RELEASE.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

/// Serializes to an error, so it can never leave the process.
#[derive(Deserialize)]
struct Unshippable;

impl Serialize for Unshippable {
    fn serialize<S: serde::Serializer>(&self, _s: S) -> Result<S::Ok, S::Error> {
        Err(serde::ser::Error::custom("holds process-local state"))
    }
}

impl RemoteTask for Unshippable {
    const KIND: &'static str = "test.unshippable";
    type Output = ();

    fn run(self) -> Result<(), TaskError> {
        Ok(())
    }
}

static ITER_SUM: AtomicI64 = AtomicI64::new(0);
static ITER_FINALIZED: AtomicUsize = AtomicUsize::new(0);

#[derive(Clone, Serialize, Deserialize)]
struct SumIndices;

impl IterativeBody for SumIndices {
    const KIND: &'static str = "test.sum_indices";

    fn run(&self, index: i64) -> Result<(), TaskError> {
        ITER_SUM.fetch_add(index, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct CountChunks;

impl Finalizer for CountChunks {
    fn finalize(&self) -> Result<(), TaskError> {
        ITER_FINALIZED.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn registry() -> FunctionRegistry {
    let mut reg = FunctionRegistry::new();
    reg.register::<Add>()
        .unwrap()
        .register::<Fail>()
        .unwrap()
        .register::<Panic>()
        .unwrap()
        .register::<Sleep>()
        .unwrap()
        .register::<Blocker>()
        .unwrap()
        .register_iterative::<SumIndices, CountChunks>()
        .unwrap();
    reg
}

fn scheduler(local_workers: usize) -> HybridScheduler {
    let mut config = SpillwayConfig::default();
    config.scheduler.local_workers = local_workers;
    config.scheduler.remote_pool_size = 16;
    config.remote.timeout_secs = 30;
    let transport = Arc::new(InProcessTransport::new(registry(), 1769));
    HybridScheduler::new(&config, transport).unwrap()
}

/// Answers correctly but replaces the log tail.
struct RewriteTail {
    inner: InProcessTransport,
    tail: Option<&'static str>,
}

#[async_trait]
impl FunctionTransport for RewriteTail {
    async fn invoke(&self, request: Vec<u8>) -> Result<InvokeResponse, WireError> {
        let mut response = self.inner.invoke(request).await?;
        response.log_tail = self.tail.map(str::to_owned);
        Ok(response)
    }

    fn name(&self) -> &str {
        "rewrite-tail"
    }
}

fn wait_until(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn scheduler_creation() {
    let s = scheduler(2);
    let m = s.metrics();
    assert_eq!(s.local_workers(), 2);
    assert_eq!(m.submitted(), 0);
    assert_eq!(m.local_queue_depth, 0);
    assert_eq!(m.remote_in_use, 0);
    assert!(!m.shut_down);
}

#[test]
fn idle_pool_runs_locally() {
    let s = scheduler(1);
    let handle = s.submit(Add(2, 3)).unwrap();
    assert_eq!(handle.backend(), Backend::Local);
    assert_eq!(handle.wait().unwrap(), 5);
    assert_eq!(s.metrics().submitted_local, 1);
}

#[test]
fn busy_pool_spills_to_remote() {
    let s = scheduler(1);

    let blocker = s.submit(Blocker).unwrap();
    assert_eq!(blocker.backend(), Backend::Local);
    wait_until(|| BLOCKER_STARTED.load(Ordering::SeqCst));
    assert_eq!(s.local_queue_depth(), 0);

    // Worker busy but nothing queued: still local, and now it waits.
    let queued = s.submit(Add(1, 1)).unwrap();
    assert_eq!(queued.backend(), Backend::Local);
    assert_eq!(s.local_queue_depth(), 1);

    let spilled = s.submit(Add(20, 22)).unwrap();
    assert_eq!(spilled.backend(), Backend::Remote);
    assert_eq!(spilled.wait_timeout(WAIT).unwrap(), 42);

    BLOCKER_RELEASE.store(true, Ordering::SeqCst);
    blocker.wait().unwrap();
    assert_eq!(queued.wait().unwrap(), 2);

    let m = s.metrics();
    assert_eq!(m.submitted_local, 2);
    assert_eq!(m.submitted_remote, 1);
    assert_eq!(m.completed, 3);
}

#[test]
fn remote_failure_surfaces_on_wait() {
    let s = scheduler(1);
    let handle = s.submit_to(Backend::Remote, Fail).unwrap();
    match handle.wait_timeout(WAIT) {
        Err(ExecutionError::Task(e)) => assert_eq!(e.0, "deliberate failure"),
        other => panic!("expected task failure, got {other:?}"),
    }
    assert_eq!(s.metrics().failed, 1);
}

#[test]
fn local_panic_is_contained() {
    let s = scheduler(1);
    let handle = s.submit_to(Backend::Local, Panic).unwrap();
    assert!(matches!(handle.wait(), Err(ExecutionError::Panicked(msg)) if msg.contains("blew up")));

    // The worker survives.
    assert_eq!(s.submit_to(Backend::Local, Add(1, 2)).unwrap().wait().unwrap(), 3);
}

#[test]
fn remote_panic_is_a_task_failure() {
    let s = scheduler(1);
    let handle = s.submit_to(Backend::Remote, Panic).unwrap();
    assert!(matches!(handle.wait_timeout(WAIT), Err(ExecutionError::Task(e)) if e.0.contains("blew up")));
}

#[test]
fn untransportable_task_fails_at_submission() {
    let s = scheduler(1);
    let err = s.submit_to(Backend::Remote, Unshippable).unwrap_err();
    assert!(matches!(err, SchedulerError::NotTransportable { kind: "test.unshippable", .. }));
    assert_eq!(s.metrics().submitted_remote, 0);
}

#[test]
fn shutdown_is_idempotent_and_rejects_work() {
    let s = scheduler(1);
    s.shutdown();
    s.shutdown();
    assert!(s.is_shut_down());
    assert!(matches!(s.submit(Add(1, 1)), Err(SchedulerError::Shutdown)));
    assert!(matches!(
        s.submit_iterative(SumIndices, 2, 0, 10, None::<NoFinalizer>),
        Err(SchedulerError::Shutdown)
    ));
}

#[test]
fn iterative_rejects_bad_arguments() {
    let s = scheduler(1);
    assert!(matches!(
        s.submit_iterative(SumIndices, 3, 5, 5, None::<NoFinalizer>),
        Err(SchedulerError::InvalidRange { from: 5, to: 5 })
    ));
    assert!(matches!(
        s.submit_iterative(SumIndices, 0, 0, 5, None::<NoFinalizer>),
        Err(SchedulerError::InvalidWorkerCount)
    ));
}

#[test]
fn iterative_covers_range_across_backends() {
    let s = scheduler(1);
    let handles = s
        .submit_iterative(SumIndices, 4, 0, 100, Some(CountChunks))
        .unwrap();
    assert_eq!(handles.len(), 4);
    assert!(s.await_all(WAIT));
    for h in handles {
        assert!(h.is_finished());
        h.wait().unwrap();
    }
    assert_eq!(ITER_SUM.load(Ordering::SeqCst), (0..100).sum::<i64>());
    assert_eq!(ITER_FINALIZED.load(Ordering::SeqCst), 4);
}

#[test]
fn await_all_reports_failure() {
    let s = scheduler(2);
    let _ok = s.submit(Add(1, 1)).unwrap();
    let _bad = s.submit_to(Backend::Remote, Fail).unwrap();
    assert!(!s.await_all(WAIT));
}

#[test]
fn await_all_times_out_without_cancelling() {
    let s = scheduler(1);
    let slow = s.submit_to(Backend::Remote, Sleep(400)).unwrap();
    assert!(!s.await_all(Duration::from_millis(50)));
    // The work itself still completes.
    slow.wait_timeout(WAIT).unwrap();
    assert!(s.await_all(WAIT));
}

#[test]
fn await_all_with_nothing_submitted() {
    let s = scheduler(1);
    assert!(s.await_all(Duration::from_millis(1)));
}

#[test]
fn then_delivers_result() {
    let s = scheduler(1);
    let (tx, rx) = mpsc::channel();
    s.submit_to(Backend::Remote, Add(40, 2)).unwrap().then(move |r| {
        let _ = tx.send(r.map_err(|e| e.to_string()));
    });
    assert_eq!(rx.recv_timeout(WAIT).unwrap().unwrap(), 42);
}

#[test]
fn cost_report_counts_remote_invocations() {
    let s = scheduler(1);
    assert!(s.cost_report().starts_with("Could not compute the Cost report!"));

    s.submit_to(Backend::Remote, Add(1, 1)).unwrap().wait_timeout(WAIT).unwrap();
    s.submit_to(Backend::Local, Add(1, 1)).unwrap().wait().unwrap();

    let report = s.cost_report();
    assert!(report.starts_with("Total executions 1\tMem. Size 1769 MB"), "{report}");
    assert!(report.ends_with("\nLocal executions: 1"), "{report}");

    s.reset_cost_report();
    assert_eq!(s.cost_snapshot().unwrap().executions(), 0);
}

#[test]
fn cost_accounting_can_be_disabled() {
    let mut config = SpillwayConfig::default();
    config.scheduler.local_workers = 1;
    config.cost.enabled = false;
    let transport = Arc::new(InProcessTransport::new(registry(), 1769));
    let s = HybridScheduler::new(&config, transport).unwrap();
    s.submit_to(Backend::Remote, Add(1, 1)).unwrap().wait_timeout(WAIT).unwrap();
    assert!(s.cost_snapshot().is_none());
}

#[test]
fn full_remote_pool_blocks_the_submitter() {
    let mut config = SpillwayConfig::default();
    config.scheduler.local_workers = 1;
    config.scheduler.remote_pool_size = 1;
    let transport = Arc::new(InProcessTransport::new(registry(), 1769));
    let s = HybridScheduler::new(&config, transport).unwrap();

    let slow = s.submit_to(Backend::Remote, Sleep(300)).unwrap();
    assert_eq!(s.metrics().remote_in_use, 1);

    let started = Instant::now();
    let next = s.submit_to(Backend::Remote, Sleep(0)).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(200), "{:?}", started.elapsed());

    next.wait_timeout(WAIT).unwrap();
    slow.wait_timeout(WAIT).unwrap();
    assert_eq!(s.metrics().submitted_remote, 2);
}

#[test]
fn unreadable_billing_lines_are_not_billed() {
    let mut config = SpillwayConfig::default();
    config.scheduler.local_workers = 1;
    for tail in [
        Some("REPORT RequestId: 1\tBilled Duration: soon\tMemory Size: lots\n"),
        Some("END RequestId: 1\n"),
        None,
    ] {
        let transport = Arc::new(RewriteTail {
            inner: InProcessTransport::new(registry(), 1769),
            tail,
        });
        let s = HybridScheduler::new(&config, transport).unwrap();
        let sum = s.submit_to(Backend::Remote, Add(2, 2)).unwrap().wait_timeout(WAIT);
        assert_eq!(sum.unwrap(), 4, "{tail:?}");
        assert_eq!(s.cost_snapshot().unwrap().executions(), 0, "{tail:?}");
        assert_eq!(s.metrics().completed, 1);
    }
}
