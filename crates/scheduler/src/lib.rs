//! Hybrid local/remote execution scheduler.
//!
//! Every submission is routed either to a small local rayon pool or to a
//! large pool of remote function invocations. The rule is greedy: if no
//! local job is waiting for a worker, run locally, otherwise spill to a
//! remote function.

pub mod cost;
pub mod error;
pub mod handle;
pub mod iterative;
pub mod metrics;
pub mod runner;
pub mod types;

pub use cost::CostReport;
pub use error::{ExecutionError, SchedulerError};
pub use handle::ResultHandle;
pub use iterative::{Finalizer, IterativeBody, IterativeChunk, NoFinalizer, RegisterIterative};
pub use metrics::SchedulerMetrics;
pub use runner::HybridScheduler;
pub use types::{admit, partition, Backend};
