use spillway_scheduler::SchedulerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("scheduler rejected a wave: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("invalid manager config: {0}")]
    Config(String),
}
