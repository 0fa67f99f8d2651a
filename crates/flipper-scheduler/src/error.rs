//! Scheduler error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("scheduler has stopped")]
    Stopped,

    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
