//! Harness-level errors
//!
//! Partition problems surface before anything is spawned. Task failures
//! and thread spawn failures surface only after every started task has been
//! joined.

use std::io;

use thiserror::Error;

use crate::shards::ShardError;

/// Why a single task did not produce an outcome
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure<E> {
    /// The task body returned `Err`
    #[error("{0}")]
    Error(E),

    /// The task body panicked; carries the panic message when it was a string
    #[error("panicked: {0}")]
    Panicked(String),
}

impl<E> TaskFailure<E> {
    pub fn is_panic(&self) -> bool {
        matches!(self, TaskFailure::Panicked(_))
    }

    /// Returns the body's error, if the task failed by returning one
    pub fn into_error(self) -> Option<E> {
        match self {
            TaskFailure::Error(e) => Some(e),
            TaskFailure::Panicked(_) => None,
        }
    }
}

/// Errors returned by a harness invocation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarnessError<E> {
    /// Bad partition parameters or malformed ranges; no task was started
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ShardError),

    /// The lowest-indexed task that failed, reported after all tasks joined
    #[error("task {index} failed: {failure}")]
    WorkerFailure {
        index: usize,
        failure: TaskFailure<E>,
    },

    /// The OS refused a worker thread; tasks before `index` ran and were joined
    #[error("failed to spawn task {index}: {message}")]
    Spawn {
        index: usize,
        kind: io::ErrorKind,
        message: String,
    },
}

impl<E> HarnessError<E> {
    /// Index of the failing task, for `WorkerFailure` and `Spawn`
    pub fn task_index(&self) -> Option<usize> {
        match self {
            HarnessError::WorkerFailure { index, .. } | HarnessError::Spawn { index, .. } => {
                Some(*index)
            }
            HarnessError::InvalidArgument(_) => None,
        }
    }

    pub(crate) fn spawn(index: usize, err: &io::Error) -> Self {
        HarnessError::Spawn {
            index,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
