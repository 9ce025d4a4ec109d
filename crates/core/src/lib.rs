pub mod config;
pub mod error;

pub use config::{
    load_dotenv, CompletionMode, CostConfig, DrainPolicy, ManagerConfig, PreSplit, RemoteConfig,
    SchedulerConfig, SpillwayConfig, StepRule, StepTrigger,
};
pub use error::ConfigError;
