//! Error taxonomy for the scheduler.
//!
//! Per-job failures (expired job, too many run attempts, worker-reported
//! failure) are job status transitions and never surface here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedError {
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Unknown queue class: {0}")]
    UnknownQueueClass(String),

    #[error("Queue already exists: {0}")]
    DuplicateName(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("{what} is too long: {len} bytes, limit is {limit}")]
    DataTooLong {
        what: &'static str,
        len: usize,
        limit: usize,
    },

    #[error("Query syntax error at position {pos}: {msg}")]
    QuerySyntax { pos: usize, msg: String },

    #[error("Access violation: {0}")]
    AccessViolation(String),

    #[error("Storage error after {attempts} attempts: {source}")]
    StorageExhausted {
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchedError {
    pub(crate) fn syntax(pos: usize, msg: impl Into<String>) -> Self {
        SchedError::QuerySyntax {
            pos,
            msg: msg.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedError>;
