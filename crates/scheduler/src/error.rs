use std::time::Duration;

use spillway_wire::{TaskError, WireError};
use thiserror::Error;

/// Synchronous submission failures. Nothing was scheduled.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is shut down")]
    Shutdown,

    #[error("task '{kind}' cannot be shipped to a remote function: {reason}")]
    NotTransportable { kind: &'static str, reason: String },

    #[error("empty iteration range [{from}, {to})")]
    InvalidRange { from: i64, to: i64 },

    #[error("iterative submission needs at least one worker")]
    InvalidWorkerCount,

    #[error("failed to start scheduler: {0}")]
    Runtime(String),

    #[error("cannot reach remote functions: {0}")]
    Connect(#[source] WireError),
}

/// Failures surfaced when a result is awaited.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("task failed: {0}")]
    Task(#[from] TaskError),

    #[error("remote invocation failed: {0}")]
    Transport(#[source] WireError),

    #[error("undecodable result: {0}")]
    Decode(String),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("no result after {0:?}")]
    Timeout(Duration),

    #[error("result dropped before completion")]
    Dropped,
}
