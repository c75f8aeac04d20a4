//! Error types for balancer operations.

use thiserror::Error;

use crate::core::task::TaskId;

/// Errors produced by the balancer and reported to requesters.
#[derive(Debug, Error)]
pub enum BalancerError {
    /// The task's operation returned an error or panicked. The worker that ran
    /// it stays in rotation.
    #[error("task {task_id} failed: {reason}")]
    TaskFailure {
        /// Failed task.
        task_id: TaskId,
        /// Error chain or panic message.
        reason: String,
    },
    /// The task ran longer than its run timeout.
    #[error("task {task_id} timed out after {timeout_ms} ms")]
    TaskTimeout {
        /// Timed out task.
        task_id: TaskId,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },
    /// No live worker could accept the task.
    #[error("no worker available for task {task_id}")]
    WorkerUnavailable {
        /// Task that could not be placed.
        task_id: TaskId,
    },
    /// The worker holding the task died before replying.
    #[error("task {task_id} was abandoned by its worker")]
    Abandoned {
        /// Abandoned task.
        task_id: TaskId,
    },
    /// A bounded queue was full and the policy forbids waiting.
    #[error("queue saturated: {0}")]
    QueueSaturated(String),
    /// Submission did not reach the intake in time.
    #[error("submission timed out")]
    SubmitTimeout,
    /// The result did not arrive in time.
    #[error("timed out waiting for result")]
    WaitTimeout,
    /// The balancer has been shut down.
    #[error("balancer has been shut down")]
    Shutdown,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Thread spawn failure, join failure or similar.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
