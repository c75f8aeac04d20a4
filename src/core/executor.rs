//! Task execution traits.

use async_trait::async_trait;

use super::TaskMetadata;

/// Executes a task payload on a worker thread and produces a result.
///
/// The balancer never looks at `P` or `R`; it only routes. Results do not need
/// to be serializable, so they can carry channels or handles.
///
/// On a worker, `execute` runs inside that worker's own single-threaded tokio
/// runtime. A slow call fully occupies the worker, which is what the load
/// counter accounts for.
///
/// Returning `Err` reports `TaskFailure` to the requester; the worker keeps
/// serving.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_balancer::core::{TaskMetadata, WorkerExecutor};
///
/// #[derive(Clone)]
/// struct Resize;
///
/// #[async_trait]
/// impl WorkerExecutor<Vec<u8>, Vec<u8>> for Resize {
///     async fn execute(&self, image: Vec<u8>, _meta: TaskMetadata) -> anyhow::Result<Vec<u8>> {
///         Ok(shrink(&image)?)
///     }
/// }
/// ```
#[async_trait]
pub trait WorkerExecutor<P, R>: Send + Sync + Clone + 'static
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Run one task.
    async fn execute(&self, payload: P, meta: TaskMetadata) -> anyhow::Result<R>;
}

/// A self-contained unit of work: call it to get the result.
pub type Operation<R> = Box<dyn FnOnce() -> anyhow::Result<R> + Send + 'static>;

/// Executor for [`Operation`] payloads; it simply calls them.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationExecutor;

#[async_trait]
impl<R: Send + 'static> WorkerExecutor<Operation<R>, R> for OperationExecutor {
    async fn execute(&self, operation: Operation<R>, _meta: TaskMetadata) -> anyhow::Result<R> {
        operation()
    }
}
