//! Range-partitioned submissions.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use spillway_wire::{FunctionRegistry, RemoteTask, TaskError, WireError};

use crate::types::partition;

/// Loop body applied to every index of an iterative submission.
pub trait IterativeBody: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Task kind of the chunks carrying this body.
    const KIND: &'static str;

    fn run(&self, index: i64) -> Result<(), TaskError>;
}

/// Runs once per chunk after its indices are done.
pub trait Finalizer: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn finalize(&self) -> Result<(), TaskError>;
}

/// Finalizer for submissions that need none.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NoFinalizer;

impl Finalizer for NoFinalizer {
    fn finalize(&self) -> Result<(), TaskError> {
        Ok(())
    }
}

/// One worker's share of an iterative submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterativeChunk<B, F> {
    pub body: B,
    pub from: i64,
    pub to: i64,
    pub worker_id: usize,
    pub workers: usize,
    pub finalizer: Option<F>,
}

impl<B: IterativeBody, F: Finalizer> RemoteTask for IterativeChunk<B, F> {
    const KIND: &'static str = B::KIND;
    type Output = ();

    fn run(self) -> Result<(), TaskError> {
        if self.workers == 0 || self.worker_id >= self.workers {
            return Err(TaskError::new(format!(
                "chunk {} of {} is out of range",
                self.worker_id, self.workers
            )));
        }
        for index in partition(self.from, self.to, self.workers, self.worker_id) {
            self.body.run(index)?;
        }
        if let Some(finalizer) = &self.finalizer {
            finalizer.finalize()?;
        }
        Ok(())
    }
}

/// Registers the chunk type of an iterative body with a function host.
pub trait RegisterIterative {
    fn register_iterative<B: IterativeBody, F: Finalizer>(&mut self) -> Result<&mut Self, WireError>;
}

impl RegisterIterative for FunctionRegistry {
    fn register_iterative<B: IterativeBody, F: Finalizer>(&mut self) -> Result<&mut Self, WireError> {
        self.register::<IterativeChunk<B, F>>()
    }
}
