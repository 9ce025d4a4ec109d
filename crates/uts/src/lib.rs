//! Unbalanced tree search on the hybrid scheduler.
//!
//! A [`Bag`] is the unexplored frontier of a probabilistic tree. The
//! [`TaskManager`] keeps splitting bags to the wanted parallelism, ships them
//! to the scheduler for a bounded number of expansions, and folds the node
//! counts of returning bags into a running total until nothing is left.

pub mod bag;
pub mod balance;
pub mod error;
pub mod job;
pub mod manager;
pub mod policy;
pub mod stats;

pub use bag::{sequential_count, Bag, FrontierEntry};
pub use balance::{coalesce_and_count, resize_bags};
pub use error::ManagerError;
pub use job::{register_functions, BagJob, BagOutcome};
pub use manager::{Progress, TaskManager};
pub use policy::{FixedWave, SteppedWave, Wave, WavePolicy};
pub use stats::{CriticalPath, RunReport, TaskStats};
