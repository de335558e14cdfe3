//! Scheduler error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler needs at least one worker")]
    NoWorkers,

    #[error("access vectors must have {expected} entries, got reads={reads} writes={writes}")]
    AccessLength {
        expected: usize,
        reads: usize,
        writes: usize,
    },

    #[error("variable index {index} out of range for {vars_count} variables")]
    VariableOutOfRange { index: usize, vars_count: usize },

    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    #[error("variable registered twice: {0}")]
    DuplicateVariable(String),

    #[error("variable name is empty or has an empty path segment: {0:?}")]
    InvalidVariableName(String),

    #[error("scheduler already started")]
    AlreadyStarted,

    #[error("scheduler not started")]
    NotStarted,

    #[error("scheduler has stopped accepting messages")]
    Stopped,

    #[error("no worker with index {0}")]
    UnknownWorker(usize),

    #[error("worker {0} is busy")]
    WorkerBusy(usize),

    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
