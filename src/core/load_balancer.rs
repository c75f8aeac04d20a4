//! Public facade: a least-loaded balancer over dedicated worker threads.
//!
//! `LoadBalancer::new` starts `worker_count` worker threads and one balancer
//! thread. Requesters submit payloads through the bounded intake and get a
//! [`TaskHandle`] back; the result travels from the worker straight to that
//! handle.
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_balancer::config::BalancerConfig;
//! use prometheus_balancer::core::LoadBalancer;
//!
//! let balancer = LoadBalancer::for_operations(
//!     BalancerConfig::new().with_worker_count(4).with_queue_capacity(8),
//! )?;
//!
//! let handle = balancer.submit_fn(|| Ok(2 + 2))?;
//! assert_eq!(handle.wait()?, 4);
//!
//! balancer.shutdown();
//! ```

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, SendTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BalancerConfig;
use crate::core::balancer::{Control, Dispatcher};
use crate::core::stats::{BalancerCounters, BalancerStats, PoolSnapshot};
use crate::core::task::{Envelope, TaskHandle, TaskMetadata, TaskOptions};
use crate::core::worker::{thread_spawner, WorkerTicket};
use crate::core::{BalancerError, Operation, OperationExecutor, WorkerExecutor};

/// Balancer over closure tasks.
pub type OperationBalancer<R> = LoadBalancer<Operation<R>, R, OperationExecutor>;

/// Routes each submitted task to the worker with the fewest outstanding tasks.
///
/// # Design
///
/// - **Single writer**: only the balancer thread touches the worker heap
/// - **Direct replies**: results bypass the balancer
/// - **Clean shutdown**: closing the intake drains queued work, then stops
///   workers
pub struct LoadBalancer<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    /// Instance id, for log correlation.
    id: Uuid,

    config: BalancerConfig,

    /// Intake sender. `None` once shut down.
    intake: Mutex<Option<Sender<Envelope<P, R>>>>,

    /// Snapshot requests to the balancer thread.
    control: Sender<Control>,

    counters: Arc<BalancerCounters>,

    balancer: Mutex<Option<JoinHandle<()>>>,

    task_ids: AtomicU64,

    _executor: PhantomData<E>,
}

impl<P, R, E> LoadBalancer<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    /// Start the worker threads and the balancer thread.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration is invalid, `Internal` if a thread
    /// could not be spawned.
    pub fn new(config: BalancerConfig, executor: E) -> Result<Self, BalancerError> {
        config.validate().map_err(BalancerError::InvalidConfig)?;

        let id = Uuid::new_v4();
        let counters = Arc::new(BalancerCounters::default());
        let (events_tx, events_rx) = unbounded();
        let (intake_tx, intake_rx) = bounded(config.intake_capacity);
        let (control_tx, control_rx) = unbounded();

        let mut spawn = thread_spawner(&config, executor, events_tx, Arc::clone(&counters));
        let workers = (0..config.worker_count)
            .map(|worker_id| spawn(WorkerTicket::first(worker_id)))
            .collect::<Result<Vec<_>, _>>()?;

        let respawn = config.respawn_workers.then_some(spawn);
        let dispatcher = Dispatcher::new(
            workers,
            config.queue_capacity,
            config.backpressure,
            Arc::clone(&counters),
            respawn,
        );

        let balancer = thread::Builder::new()
            .name(format!("{}-balancer", config.thread_name_prefix))
            .spawn(move || dispatcher.run(intake_rx, events_rx, control_rx))
            .map_err(|e| BalancerError::Internal(format!("failed to spawn balancer: {e}")))?;

        info!(
            balancer_id = %id,
            worker_count = config.worker_count,
            queue_capacity = config.queue_capacity,
            intake_capacity = config.intake_capacity,
            backpressure = ?config.backpressure,
            "LoadBalancer initialized"
        );

        Ok(Self {
            id,
            config,
            intake: Mutex::new(Some(intake_tx)),
            control: control_tx,
            counters,
            balancer: Mutex::new(Some(balancer)),
            task_ids: AtomicU64::new(0),
            _executor: PhantomData,
        })
    }

    /// Instance id used in log fields.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Configuration the balancer was built with.
    #[must_use]
    pub const fn config(&self) -> &BalancerConfig {
        &self.config
    }

    /// Submit a task, blocking while the intake is full.
    ///
    /// # Errors
    ///
    /// `Shutdown` if the balancer has been shut down.
    pub fn submit(&self, payload: P) -> Result<TaskHandle<R>, BalancerError> {
        self.submit_with(payload, TaskOptions::default())
    }

    /// Submit a task with per-task options, blocking while the intake is full.
    ///
    /// # Errors
    ///
    /// `Shutdown` if the balancer has been shut down.
    pub fn submit_with(
        &self,
        payload: P,
        options: TaskOptions,
    ) -> Result<TaskHandle<R>, BalancerError> {
        let intake = self.intake_sender()?;
        let (envelope, handle) = Envelope::new(payload, self.next_meta(options));
        intake.send(envelope).map_err(|_| BalancerError::Shutdown)?;
        Ok(self.accepted(handle))
    }

    /// Submit without blocking.
    ///
    /// # Errors
    ///
    /// `QueueSaturated` if the intake is full, `Shutdown` if shut down.
    pub fn try_submit(&self, payload: P) -> Result<TaskHandle<R>, BalancerError> {
        let intake = self.intake_sender()?;
        let (envelope, handle) = Envelope::new(payload, self.next_meta(TaskOptions::default()));
        match intake.try_send(envelope) {
            Ok(()) => Ok(self.accepted(handle)),
            Err(TrySendError::Full(_)) => {
                warn!(balancer_id = %self.id, "Intake is full");
                Err(BalancerError::QueueSaturated("intake is full".into()))
            }
            Err(TrySendError::Disconnected(_)) => Err(BalancerError::Shutdown),
        }
    }

    /// Submit, waiting at most `timeout` for room in the intake.
    ///
    /// # Errors
    ///
    /// `SubmitTimeout` if the intake stayed full, `Shutdown` if shut down.
    pub fn submit_timeout(
        &self,
        payload: P,
        timeout: Duration,
    ) -> Result<TaskHandle<R>, BalancerError> {
        let intake = self.intake_sender()?;
        let (envelope, handle) = Envelope::new(payload, self.next_meta(TaskOptions::default()));
        match intake.send_timeout(envelope, timeout) {
            Ok(()) => Ok(self.accepted(handle)),
            Err(SendTimeoutError::Timeout(_)) => Err(BalancerError::SubmitTimeout),
            Err(SendTimeoutError::Disconnected(_)) => Err(BalancerError::Shutdown),
        }
    }

    /// Submit from an async context. A full intake is waited on from tokio's
    /// blocking pool rather than the calling task.
    ///
    /// # Errors
    ///
    /// `Shutdown` if shut down, `Internal` if the blocking wait fails.
    pub async fn submit_async(&self, payload: P) -> Result<TaskHandle<R>, BalancerError> {
        let intake = self.intake_sender()?;
        let (envelope, handle) = Envelope::new(payload, self.next_meta(TaskOptions::default()));
        match intake.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(envelope)) => {
                debug!(
                    balancer_id = %self.id,
                    task_id = handle.id(),
                    "Intake full, waiting off the async runtime"
                );
                let sent = tokio::task::spawn_blocking(move || intake.send(envelope).is_ok())
                    .await
                    .map_err(|e| BalancerError::Internal(format!("submit task failed: {e}")))?;
                if !sent {
                    return Err(BalancerError::Shutdown);
                }
            }
            Err(TrySendError::Disconnected(_)) => return Err(BalancerError::Shutdown),
        }
        Ok(self.accepted(handle))
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> BalancerStats {
        self.counters.snapshot(self.config.worker_count)
    }

    /// Per-worker loads as seen by the balancer between two events.
    ///
    /// Answered by the balancer thread, so this waits behind a dispatch that
    /// is blocked on a full worker queue.
    ///
    /// # Errors
    ///
    /// `Shutdown` if the balancer thread has stopped.
    pub fn snapshot(&self) -> Result<PoolSnapshot, BalancerError> {
        let (tx, rx) = bounded(1);
        self.control
            .send(Control::Snapshot(tx))
            .map_err(|_| BalancerError::Shutdown)?;
        rx.recv().map_err(|_| BalancerError::Shutdown)
    }

    /// True once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.intake.lock().is_none()
    }

    /// Close the intake and wait until every accepted task has run and every
    /// worker has exited.
    pub fn shutdown(&self) {
        let Some(intake) = self.intake.lock().take() else {
            return;
        };
        drop(intake);
        info!(balancer_id = %self.id, "Shutting down balancer");

        let balancer = self.balancer.lock().take();
        if let Some(balancer) = balancer {
            if balancer.join().is_err() {
                error!(balancer_id = %self.id, "Balancer thread panicked");
            }
        }

        info!(balancer_id = %self.id, "Balancer shut down complete");
    }

    /// Like [`shutdown`](Self::shutdown) but gives up waiting after
    /// `timeout`, leaving the threads to finish on their own. Returns true if
    /// everything stopped in time.
    pub fn shutdown_timeout(&self, timeout: Duration) -> bool {
        if self.intake.lock().take().is_none() {
            return true;
        }
        info!(balancer_id = %self.id, timeout_ms = timeout.as_millis(), "Shutting down balancer");

        let Some(balancer) = self.balancer.lock().take() else {
            return true;
        };
        let (tx, rx) = bounded(1);
        thread::spawn(move || {
            let _ = tx.send(balancer.join().is_ok());
        });

        match rx.recv_timeout(timeout) {
            Ok(true) => true,
            Ok(false) => {
                error!(balancer_id = %self.id, "Balancer thread panicked");
                true
            }
            Err(_) => {
                warn!(balancer_id = %self.id, "Balancer did not stop within timeout - detaching");
                false
            }
        }
    }

    fn intake_sender(&self) -> Result<Sender<Envelope<P, R>>, BalancerError> {
        self.intake.lock().clone().ok_or(BalancerError::Shutdown)
    }

    fn next_meta(&self, options: TaskOptions) -> TaskMetadata {
        let mut meta = TaskMetadata::new(self.task_ids.fetch_add(1, Ordering::Relaxed));
        meta.timeout_ms = options
            .timeout
            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
            .or(self.config.task_timeout_ms);
        meta
    }

    fn accepted(&self, handle: TaskHandle<R>) -> TaskHandle<R> {
        self.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
        debug!(balancer_id = %self.id, task_id = handle.id(), "Task submitted");
        handle
    }
}

impl<R: Send + 'static> LoadBalancer<Operation<R>, R, OperationExecutor> {
    /// Balancer whose tasks are plain closures.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new).
    pub fn for_operations(config: BalancerConfig) -> Result<Self, BalancerError> {
        Self::new(config, OperationExecutor)
    }

    /// Submit a closure, blocking while the intake is full.
    ///
    /// # Errors
    ///
    /// `Shutdown` if the balancer has been shut down.
    pub fn submit_fn<F>(&self, operation: F) -> Result<TaskHandle<R>, BalancerError>
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
    {
        self.submit(Box::new(operation))
    }
}

impl<P, R, E> Drop for LoadBalancer<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    fn drop(&mut self) {
        // Closing the intake lets the threads drain and exit; they are not
        // joined here.
        if self.intake.lock().take().is_some() {
            debug!(
                balancer_id = %self.id,
                "LoadBalancer dropped without explicit shutdown - threads will be detached"
            );
        }
    }
}
