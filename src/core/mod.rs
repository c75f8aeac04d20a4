//! Least-loaded dispatch: the worker heap, the balancer loop and its workers.

pub mod error;
pub mod executor;
pub mod heap;
pub mod load_balancer;
pub mod stats;
pub mod task;

mod balancer;
mod worker;

pub use error::{AppResult, BalancerError};
pub use executor::{Operation, OperationExecutor, WorkerExecutor};
pub use heap::{Loaded, PriorityPool, WorkerId};
pub use load_balancer::{LoadBalancer, OperationBalancer};
pub use stats::{BalancerStats, PoolSnapshot, WorkerLoad};
pub use task::{TaskHandle, TaskId, TaskMetadata, TaskOptions, TaskResult};
