use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spillway_wire::{FunctionRegistry, RemoteTask, TaskError, WireError};

use crate::bag::Bag;

/// One wave item: expand `bag` at most `iterations` times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BagJob {
    pub bag: Bag,
    pub iterations: u64,
}

/// The bag as the worker left it, with the worker's wall-clock window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BagOutcome {
    pub bag: Bag,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RemoteTask for BagJob {
    const KIND: &'static str = "uts.bag";
    type Output = BagOutcome;

    fn run(mut self) -> Result<BagOutcome, TaskError> {
        let started_at = Utc::now();
        self.bag.expand_n(self.iterations);
        Ok(BagOutcome {
            bag: self.bag,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

/// Register every task the UTS workload ships to remote functions.
pub fn register_functions(registry: &mut FunctionRegistry) -> Result<(), WireError> {
    registry.register::<BagJob>()?;
    Ok(())
}
