//! Run configuration: TOML file, `.env`, and `SPILLWAY_*` overrides.

mod loading;
mod types;
mod validation;

pub use loading::load_dotenv;
pub use types::{
    CompletionMode, CostConfig, DrainPolicy, ManagerConfig, PreSplit, RemoteConfig,
    SchedulerConfig, SpillwayConfig, StepRule, StepTrigger,
};
