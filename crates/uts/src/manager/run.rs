use std::sync::atomic::Ordering;
use std::time::Instant;

use chrono::{DateTime, Utc};
use spillway_core::CompletionMode;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::bag::Bag;
use crate::balance::{coalesce_and_count, resize_bags};
use crate::error::ManagerError;
use crate::job::BagJob;
use crate::stats::{RunReport, TaskStats};

use super::{Completion, TaskManager};

/// Batches between two progress lines.
const PROGRESS_EVERY: u64 = 10;

/// Bookkeeping of one run, turned into the [`RunReport`].
#[derive(Default)]
struct Tally {
    waves: u64,
    dispatched: u64,
    failed: u64,
    stats: Vec<TaskStats>,
}

impl TaskManager<'_> {
    /// Explore the whole tree and return the node count with run statistics.
    ///
    /// Failed wave items are logged and counted; their bags are lost. A
    /// rejected submission ends the run with an error. Blocks the calling
    /// thread, so it must not be called from inside an async context.
    pub fn run(&mut self) -> Result<RunReport, ManagerError> {
        let started = Instant::now();
        let reference = Utc::now();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tally = Tally::default();

        info!(
            seed = self.config.seed,
            depth = self.config.depth,
            drain = ?self.config.drain,
            completion = ?self.config.completion,
            presplit = self.config.presplit.is_some(),
            "task manager starting"
        );

        let first = self.policy.wave(0);
        let mut bags = vec![Bag::seeded(self.config.seed, self.config.depth)];
        let mut counted = 0;
        if let Some(presplit) = self.config.presplit.clone() {
            counted += self.presplit(&mut bags, &presplit);
        }
        let mut live = Vec::with_capacity(bags.len());
        counted += coalesce_and_count(bags, &mut live);
        self.progress.total.fetch_add(counted, Ordering::AcqRel);
        if self.config.presplit.is_none() {
            resize_bags(&mut live, first.parallelism);
        }
        self.dispatch(live, first.iterations, &tx, &mut tally)?;

        let batch_size = self.config.drain.batch_size();
        while self.progress.in_flight() > 0 {
            let batch = self.collect(&mut rx, batch_size);
            if batch.is_empty() {
                break;
            }
            self.progress
                .in_flight
                .fetch_sub(batch.len() as u64, Ordering::AcqRel);

            let mut finished = Vec::with_capacity(batch.len());
            for completion in batch {
                match completion.result {
                    Ok(outcome) => {
                        tally.stats.push(TaskStats {
                            bag_id: completion.bag_id,
                            parent_bag_id: completion.parent,
                            init_ms: millis_between(reference, outcome.started_at),
                            duration_ms: millis_between(outcome.started_at, outcome.finished_at),
                        });
                        finished.push(outcome.bag);
                    }
                    Err(e) => {
                        tally.failed += 1;
                        warn!(bag_id = %completion.bag_id, error = %e, "wave item failed, bag dropped");
                    }
                }
            }

            let mut live = Vec::with_capacity(finished.len());
            let counted = coalesce_and_count(finished, &mut live);
            let total = self.progress.total.fetch_add(counted, Ordering::AcqRel) + counted;
            tally.waves += 1;

            let in_flight = self.progress.in_flight();
            if tally.waves % PROGRESS_EVERY == 0 {
                debug!(
                    waves = tally.waves,
                    in_flight,
                    total,
                    local_queue = self.scheduler.local_queue_depth(),
                    "task manager progress"
                );
            }

            let wave = self.policy.wave(in_flight);
            resize_bags(&mut live, wave.parallelism);
            self.dispatch(live, wave.iterations, &tx, &mut tally)?;
        }

        let report = RunReport {
            total: self.progress.total(),
            elapsed: started.elapsed(),
            waves: tally.waves,
            dispatched: tally.dispatched,
            failed: tally.failed,
            stats: tally.stats,
        };
        info!(
            total = report.total,
            elapsed_ms = report.elapsed.as_millis() as u64,
            waves = report.waves,
            dispatched = report.dispatched,
            failed = report.failed,
            "task manager finished"
        );
        Ok(report)
    }

    /// Submit one [`BagJob`] per bag. In-flight is raised for the whole wave
    /// before the first submission.
    fn dispatch(
        &self,
        bags: Vec<Bag>,
        iterations: u64,
        tx: &UnboundedSender<Completion>,
        tally: &mut Tally,
    ) -> Result<(), ManagerError> {
        let wave = bags.len() as u64;
        if wave == 0 {
            return Ok(());
        }
        self.progress.in_flight.fetch_add(wave, Ordering::AcqRel);

        for (submitted, bag) in (0u64..).zip(bags) {
            let bag_id = bag.id();
            let parent = bag.parent();
            let handle = match self.scheduler.submit(BagJob { bag, iterations }) {
                Ok(handle) => handle,
                Err(e) => {
                    self.progress
                        .in_flight
                        .fetch_sub(wave - submitted, Ordering::AcqRel);
                    return Err(e.into());
                }
            };
            let tx = tx.clone();
            handle.then(move |result| {
                // The receiver only goes away when the run has already ended.
                let _ = tx.send(Completion {
                    bag_id,
                    parent,
                    result,
                });
            });
            tally.dispatched += 1;
        }
        Ok(())
    }

    /// Wait for one completion, then take whatever else is queued, up to
    /// `batch_size` in total. Empty only if the queue is closed.
    fn collect(
        &self,
        rx: &mut UnboundedReceiver<Completion>,
        batch_size: usize,
    ) -> Vec<Completion> {
        let first = match self.config.completion {
            CompletionMode::Blocking => rx.blocking_recv(),
            CompletionMode::Poll => loop {
                match rx.try_recv() {
                    Ok(completion) => break Some(completion),
                    Err(TryRecvError::Empty) => std::thread::yield_now(),
                    Err(TryRecvError::Disconnected) => break None,
                }
            },
        };
        let Some(first) = first else {
            return Vec::new();
        };

        let mut batch = Vec::with_capacity(batch_size);
        batch.push(first);
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(completion) => batch.push(completion),
                Err(_) => break,
            }
        }
        batch
    }
}

fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_milliseconds()
}
