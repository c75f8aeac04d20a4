//! Balancer configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix for environment variables read by [`BalancerConfig::from_env`].
pub const ENV_PREFIX: &str = "BALANCER_";

/// What the balancer does when the least-loaded worker's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// Block the dispatch loop until the worker drains.
    Block,
    /// Fail the task with `QueueSaturated` immediately.
    Reject,
    /// Block for at most `timeout_ms`, then fail with `QueueSaturated`.
    Wait {
        /// Upper bound on a single dispatch wait.
        timeout_ms: u64,
    },
}

impl FromStr for Backpressure {
    type Err = String;

    /// Parses `block`, `reject` or `wait:<ms>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "reject" => Ok(Self::Reject),
            other => {
                let ms = other
                    .strip_prefix("wait:")
                    .ok_or_else(|| format!("unknown backpressure mode `{s}`"))?;
                let timeout_ms = ms
                    .parse::<u64>()
                    .map_err(|e| format!("invalid wait timeout `{ms}`: {e}"))?;
                Ok(Self::Wait { timeout_ms })
            }
        }
    }
}

/// Configuration for a [`LoadBalancer`](crate::core::LoadBalancer).
///
/// Fixed at construction. Every field has a default, so partial JSON documents
/// are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Number of worker threads (N).
    pub worker_count: usize,
    /// Tasks a single worker may hold, including the one it is executing (C).
    pub queue_capacity: usize,
    /// Submitted tasks buffered ahead of the balancer loop.
    pub intake_capacity: usize,
    /// Policy for a full worker queue.
    pub backpressure: Backpressure,
    /// Default run timeout applied to tasks without their own.
    pub task_timeout_ms: Option<u64>,
    /// Replace workers whose thread died instead of retiring them.
    pub respawn_workers: bool,
    /// Stack size for worker threads in bytes.
    pub thread_stack_size: usize,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            queue_capacity: 100,
            intake_capacity: 1024,
            backpressure: Backpressure::Block,
            task_timeout_ms: None,
            respawn_workers: true,
            thread_stack_size: 2 * 1024 * 1024,
            thread_name_prefix: "lb-worker".into(),
        }
    }
}

impl BalancerConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of workers.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the per-worker queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Set the intake capacity.
    #[must_use]
    pub const fn with_intake_capacity(mut self, intake_capacity: usize) -> Self {
        self.intake_capacity = intake_capacity;
        self
    }

    /// Set the backpressure policy.
    #[must_use]
    pub const fn with_backpressure(mut self, backpressure: Backpressure) -> Self {
        self.backpressure = backpressure;
        self
    }

    /// Set the default task run timeout.
    #[must_use]
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Enable or disable respawning of dead workers.
    #[must_use]
    pub const fn with_respawn_workers(mut self, respawn: bool) -> Self {
        self.respawn_workers = respawn;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = size;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Default run timeout as a `Duration`.
    #[must_use]
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".into());
        }
        if self.intake_capacity == 0 {
            return Err("intake_capacity must be greater than 0".into());
        }
        if let Backpressure::Wait { timeout_ms: 0 } = self.backpressure {
            return Err("backpressure wait timeout must be greater than 0".into());
        }
        if self.task_timeout_ms == Some(0) {
            return Err("task_timeout_ms must be greater than 0 when set".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        if self.thread_name_prefix.is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `BALANCER_*` environment variables, loading a
    /// `.env` file first if one exists. Unset variables keep their defaults.
    ///
    /// Recognized: `BALANCER_WORKER_COUNT`, `BALANCER_QUEUE_CAPACITY`,
    /// `BALANCER_INTAKE_CAPACITY`, `BALANCER_BACKPRESSURE` (`block`, `reject`,
    /// `wait:<ms>`), `BALANCER_TASK_TIMEOUT_MS`, `BALANCER_RESPAWN_WORKERS`,
    /// `BALANCER_THREAD_STACK_SIZE`, `BALANCER_THREAD_NAME_PREFIX`.
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable that failed to parse, or the
    /// validation failure.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup using the same keys as
    /// [`from_env`](Self::from_env).
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("WORKER_COUNT") {
            cfg.worker_count = parse_var("WORKER_COUNT", &v)?;
        }
        if let Some(v) = var("QUEUE_CAPACITY") {
            cfg.queue_capacity = parse_var("QUEUE_CAPACITY", &v)?;
        }
        if let Some(v) = var("INTAKE_CAPACITY") {
            cfg.intake_capacity = parse_var("INTAKE_CAPACITY", &v)?;
        }
        if let Some(v) = var("BACKPRESSURE") {
            cfg.backpressure = parse_var("BACKPRESSURE", &v)?;
        }
        if let Some(v) = var("TASK_TIMEOUT_MS") {
            cfg.task_timeout_ms = Some(parse_var("TASK_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = var("RESPAWN_WORKERS") {
            cfg.respawn_workers = parse_var("RESPAWN_WORKERS", &v)?;
        }
        if let Some(v) = var("THREAD_STACK_SIZE") {
            cfg.thread_stack_size = parse_var("THREAD_STACK_SIZE", &v)?;
        }
        if let Some(v) = var("THREAD_NAME_PREFIX") {
            cfg.thread_name_prefix = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| format!("{ENV_PREFIX}{name}: {e}"))
}
