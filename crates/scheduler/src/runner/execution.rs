use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use spillway_wire::{
    panic_message, Envelope, FunctionTransport, InvocationReport, Outcome, RemoteTask, Reply,
    TaskError, WireError,
};
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cost::CostReport;
use crate::error::{ExecutionError, SchedulerError};
use crate::handle::{Completion, ResultHandle};
use crate::iterative::{Finalizer, IterativeBody, IterativeChunk};
use crate::types::{admit, Backend};

use super::core::{lock, PRUNE_FLOOR};
use super::HybridScheduler;

impl HybridScheduler {
    /// Submit one task, routing it by the admission rule.
    ///
    /// A remote submission blocks while every remote slot is taken.
    pub fn submit<T: RemoteTask>(&self, task: T) -> Result<ResultHandle<T::Output>, SchedulerError> {
        if self.is_shut_down() {
            return Err(SchedulerError::Shutdown);
        }
        let depth = self.local_queue_depth();
        let backend = admit(depth);
        debug!(kind = T::KIND, depth, %backend, "admitted submission");
        match backend {
            Backend::Local => self.submit_local(task),
            Backend::Remote => self.submit_remote(task),
        }
    }

    /// Submit to a specific backend, bypassing admission.
    pub fn submit_to<T: RemoteTask>(
        &self,
        backend: Backend,
        task: T,
    ) -> Result<ResultHandle<T::Output>, SchedulerError> {
        if self.is_shut_down() {
            return Err(SchedulerError::Shutdown);
        }
        match backend {
            Backend::Local => self.submit_local(task),
            Backend::Remote => self.submit_remote(task),
        }
    }

    /// Split `[from, to)` over `workers` chunks and submit each one.
    ///
    /// Each chunk is admitted on its own and runs `finalizer` after its indices.
    pub fn submit_iterative<B, F>(
        &self,
        body: B,
        workers: usize,
        from: i64,
        to: i64,
        finalizer: Option<F>,
    ) -> Result<Vec<ResultHandle<()>>, SchedulerError>
    where
        B: IterativeBody,
        F: Finalizer,
    {
        if workers == 0 {
            return Err(SchedulerError::InvalidWorkerCount);
        }
        if to <= from {
            return Err(SchedulerError::InvalidRange { from, to });
        }
        (0..workers)
            .map(|worker_id| {
                self.submit(IterativeChunk {
                    body: body.clone(),
                    from,
                    to,
                    worker_id,
                    workers,
                    finalizer: finalizer.clone(),
                })
            })
            .collect()
    }

    /// Wait for every outstanding submission, under one deadline for the set.
    ///
    /// Returns false as soon as one fails or the deadline passes. Timing out
    /// does not stop any work.
    pub fn await_all(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::from_std(Instant::now() + timeout);
        let pending: Vec<Completion> = lock(&self.outstanding).clone();
        let Some(runtime) = &self.runtime else {
            return pending.iter().all(|c| *c.borrow() == Some(true));
        };

        for mut done in pending {
            let ok = runtime.block_on(async {
                match tokio::time::timeout_at(deadline, done.wait_for(Option::is_some)).await {
                    Ok(Ok(state)) => *state == Some(true),
                    Ok(Err(_)) | Err(_) => false,
                }
            });
            if !ok {
                debug!("await_all stopped on a failed or late submission");
                return false;
            }
        }
        lock(&self.outstanding).retain(|c| *c.borrow() != Some(true));
        true
    }

    fn track(&self) -> (watch::Sender<Option<bool>>, Completion) {
        let (done_tx, done_rx) = watch::channel(None);
        let mut outstanding = lock(&self.outstanding);
        outstanding.push(done_rx.clone());
        if outstanding.len() >= self.prune_at.load(Ordering::Relaxed) {
            outstanding.retain(|c| *c.borrow() != Some(true));
            self.prune_at
                .store((outstanding.len() * 2).max(PRUNE_FLOOR), Ordering::Relaxed);
        }
        (done_tx, done_rx)
    }

    fn submit_local<T: RemoteTask>(&self, task: T) -> Result<ResultHandle<T::Output>, SchedulerError> {
        let runtime = self.runtime_handle()?;
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let (done_tx, done_rx) = self.track();

        self.counters.submitted_local.fetch_add(1, Ordering::Relaxed);
        self.local_pending.fetch_add(1, Ordering::SeqCst);

        let pending = Arc::clone(&self.local_pending);
        let counters = Arc::clone(&self.counters);
        self.local_pool.spawn(move || {
            pending.fetch_sub(1, Ordering::SeqCst);
            let result = match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(ExecutionError::Task(e)),
                Err(p) => Err(ExecutionError::Panicked(panic_message(p.as_ref()))),
            };
            if let Err(e) = &result {
                warn!(kind = T::KIND, task_id = %id, error = %e, "local task failed");
            }
            counters.record_outcome(result.is_ok());
            done_tx.send_replace(Some(result.is_ok()));
            let _ = tx.send(result);
        });

        Ok(ResultHandle::new(id, Backend::Local, rx, done_rx, runtime))
    }

    fn submit_remote<T: RemoteTask>(&self, task: T) -> Result<ResultHandle<T::Output>, SchedulerError> {
        let runtime = self.runtime_handle()?;
        let seq = self.invocation_seq.fetch_add(1, Ordering::Relaxed);
        let invocation = format!("spillway-{}-{seq}", self.executor_id);
        let not_transportable = |e: rmp_serde::encode::Error| SchedulerError::NotTransportable {
            kind: T::KIND,
            reason: e.to_string(),
        };
        let envelope = Envelope::new(&task, invocation).map_err(not_transportable)?;
        let request = envelope.to_bytes().map_err(not_transportable)?;
        drop(task);

        let permit = match Arc::clone(&self.remote_slots).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(kind = T::KIND, "remote pool exhausted, waiting for a slot");
                futures::executor::block_on(Arc::clone(&self.remote_slots).acquire_owned())
                    .map_err(|_| SchedulerError::Shutdown)?
            }
        };

        let id = envelope.id;
        let invocation = envelope.invocation;
        let (tx, rx) = oneshot::channel();
        let (done_tx, done_rx) = self.track();
        self.counters.submitted_remote.fetch_add(1, Ordering::Relaxed);

        let transport = Arc::clone(&self.transport);
        let counters = Arc::clone(&self.counters);
        let cost = self.cost.clone();
        let timeout = self.remote_timeout;
        runtime.spawn(async move {
            let result =
                invoke_remote::<T::Output>(transport.as_ref(), request, id, timeout, cost.as_deref())
                    .await;
            drop(permit);
            if let Err(e) = &result {
                warn!(kind = T::KIND, invocation = %invocation, error = %e, "remote task failed");
            }
            counters.record_outcome(result.is_ok());
            done_tx.send_replace(Some(result.is_ok()));
            let _ = tx.send(result);
        });

        Ok(ResultHandle::new(id, Backend::Remote, rx, done_rx, runtime))
    }
}

/// One remote round trip: invoke, account cost, decode the reply.
async fn invoke_remote<O: DeserializeOwned>(
    transport: &dyn FunctionTransport,
    request: Vec<u8>,
    envelope_id: Uuid,
    timeout: Duration,
    cost: Option<&Mutex<CostReport>>,
) -> Result<O, ExecutionError> {
    let response = match tokio::time::timeout(timeout, transport.invoke(request)).await {
        Ok(Ok(response)) => response,
        Ok(Err(WireError::Timeout(waited))) => return Err(ExecutionError::Timeout(waited)),
        Ok(Err(e)) => return Err(ExecutionError::Transport(e)),
        Err(_) => return Err(ExecutionError::Timeout(timeout)),
    };

    if let Some(cost) = cost {
        match response.log_tail.as_deref().and_then(InvocationReport::parse) {
            Some(report) => lock(cost).record(report),
            None => debug!(envelope = %envelope_id, "no billing metadata in response"),
        }
    }

    let reply = Reply::from_bytes(&response.payload)
        .map_err(|e| ExecutionError::Decode(format!("reply envelope: {e}")))?;
    if reply.correlation_id != envelope_id {
        return Err(ExecutionError::Decode(format!(
            "reply answers {} instead of {envelope_id}",
            reply.correlation_id
        )));
    }
    match reply.outcome {
        Outcome::Ok(bytes) => rmp_serde::from_slice(&bytes)
            .map_err(|e| ExecutionError::Decode(format!("task output: {e}"))),
        Outcome::Failed(msg) => Err(ExecutionError::Task(TaskError(msg))),
    }
}
