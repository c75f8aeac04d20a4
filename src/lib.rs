//! # Prometheus Balancer
//!
//! A least-loaded task balancer over a fixed set of dedicated worker threads.
//!
//! Requesters submit work through a bounded intake. A single balancer thread
//! hands each task to the worker with the fewest outstanding tasks, and every
//! worker reports back when it finishes so the balancer can re-sort. Results
//! go straight from the worker to the requester's [`TaskHandle`](core::TaskHandle).
//!
//! ## Key Features
//!
//! - **Least-Loaded Dispatch**: an indexed min-heap keyed by outstanding load
//! - **Completion Feedback**: loads drop as soon as a worker finishes a task
//! - **Backpressure**: block, reject or wait with a timeout on full worker queues
//! - **Failure Isolation**: task errors, panics and run timeouts reach only the
//!   requester; the worker keeps going
//! - **Worker Recovery**: dead workers are respawned or retired, and their load
//!   is released
//! - **Graceful Shutdown**: queued work drains before workers stop
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use prometheus_balancer::config::{Backpressure, BalancerConfig};
//! use prometheus_balancer::core::{LoadBalancer, TaskMetadata, WorkerExecutor};
//!
//! #[derive(Clone)]
//! struct Square;
//!
//! #[async_trait::async_trait]
//! impl WorkerExecutor<u64, u64> for Square {
//!     async fn execute(&self, payload: u64, _meta: TaskMetadata) -> anyhow::Result<u64> {
//!         Ok(payload * payload)
//!     }
//! }
//!
//! let balancer = LoadBalancer::new(
//!     BalancerConfig::new()
//!         .with_worker_count(4)
//!         .with_queue_capacity(16)
//!         .with_backpressure(Backpressure::Block),
//!     Square,
//! )?;
//!
//! let handle = balancer.submit(12)?;
//! assert_eq!(handle.wait()?, 144);
//!
//! // Async callers
//! let handle = balancer.submit_async(7).await?;
//! assert_eq!(handle.wait_async().await?, 49);
//!
//! balancer.shutdown();
//! ```
//!
//! For complete examples, see `tests/balancer_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Balancer, workers, tasks and statistics.
pub mod core;
/// Configuration for the balancer and its workers.
pub mod config;
/// Shared utilities.
pub mod util;
