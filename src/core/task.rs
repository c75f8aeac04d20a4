//! Tasks, their metadata and the handle a requester waits on.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::core::BalancerError;

/// Identifier assigned to each submitted task.
pub type TaskId = u64;

/// Outcome delivered to a task's reply channel.
pub type TaskResult<R> = Result<R, BalancerError>;

/// Metadata travelling with a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Unique task identifier.
    pub id: TaskId,
    /// Run timeout in milliseconds, if any.
    pub timeout_ms: Option<u64>,
    /// Submission timestamp in milliseconds since epoch.
    pub created_at_ms: u128,
}

impl TaskMetadata {
    /// Metadata with no timeout, stamped now.
    #[must_use]
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            timeout_ms: None,
            created_at_ms: crate::util::clock::now_ms(),
        }
    }

    /// Run timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Per-submission options.
///
/// The run timeout is measured on the worker from the moment the task starts.
/// An executor future that awaits is cancelled when it fires. A task that
/// blocks without awaiting, such as an `Operation` closure, cannot be
/// interrupted: it runs to completion, occupying its worker, and is then
/// reported as `TaskTimeout` with its value discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOptions {
    /// Overrides the configured default run timeout.
    pub timeout: Option<Duration>,
}

impl TaskOptions {
    /// Options with a run timeout.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// A task on its way to a worker: payload, metadata and private reply channel.
pub(crate) struct Envelope<P, R> {
    pub payload: P,
    pub meta: TaskMetadata,
    pub reply: Sender<TaskResult<R>>,
}

impl<P, R> Envelope<P, R> {
    /// Create an envelope and the handle its requester waits on.
    pub fn new(payload: P, meta: TaskMetadata) -> (Self, TaskHandle<R>) {
        let (reply, rx) = bounded(1);
        let handle = TaskHandle { id: meta.id, rx };
        (
            Self {
                payload,
                meta,
                reply,
            },
            handle,
        )
    }

    pub const fn id(&self) -> TaskId {
        self.meta.id
    }

    /// Answer the requester with an error without running the task.
    pub fn fail(self, err: BalancerError) {
        let task_id = self.meta.id;
        if self.reply.send(Err(err)).is_err() {
            tracing::debug!(task_id = task_id, "Requester gone before failure was reported");
        }
    }
}

/// Requester-side handle for one task's result.
///
/// The result is delivered straight from the worker, never through the
/// balancer.
#[derive(Debug)]
pub struct TaskHandle<R> {
    id: TaskId,
    rx: Receiver<TaskResult<R>>,
}

impl<R> TaskHandle<R> {
    /// The task's id.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Block until the result arrives.
    ///
    /// # Errors
    ///
    /// The task's own error, or `Abandoned` if it was dropped unanswered.
    pub fn wait(self) -> TaskResult<R> {
        let id = self.id;
        self.rx
            .recv()
            .unwrap_or(Err(BalancerError::Abandoned { task_id: id }))
    }

    /// Block until the result arrives or `timeout` elapses. The handle stays
    /// usable after a timeout.
    ///
    /// # Errors
    ///
    /// `WaitTimeout` on timeout, otherwise as [`wait`](Self::wait).
    pub fn wait_timeout(&self, timeout: Duration) -> TaskResult<R> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(BalancerError::WaitTimeout),
            Err(RecvTimeoutError::Disconnected) => {
                Err(BalancerError::Abandoned { task_id: self.id })
            }
        }
    }

    /// Non-blocking check for a finished result.
    #[must_use]
    pub fn try_result(&self) -> Option<TaskResult<R>> {
        self.rx.try_recv().ok()
    }
}

impl<R: Send + 'static> TaskHandle<R> {
    /// Wait for the result from an async context.
    ///
    /// The channel wait runs on tokio's blocking pool.
    ///
    /// # Errors
    ///
    /// As [`wait`](Self::wait); `Internal` if the blocking task fails.
    pub async fn wait_async(self) -> TaskResult<R> {
        tokio::task::spawn_blocking(move || self.wait())
            .await
            .map_err(|e| BalancerError::Internal(format!("wait task failed: {e}")))?
    }

    /// Wait from an async context with a timeout.
    ///
    /// # Errors
    ///
    /// `WaitTimeout` on timeout, otherwise as [`wait_async`](Self::wait_async).
    pub async fn wait_async_timeout(self, timeout: Duration) -> TaskResult<R> {
        tokio::time::timeout(timeout, self.wait_async())
            .await
            .unwrap_or(Err(BalancerError::WaitTimeout))
    }
}
