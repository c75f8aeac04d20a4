//! Worker threads.
//!
//! Each worker is a dedicated OS thread with its own single-threaded tokio
//! runtime and a bounded inbound queue. It runs one task at a time, replies to
//! the task's requester directly, then reports completion to the balancer.
//!
//! A worker never touches the pool. Its `load` and heap position live in the
//! [`WorkerHandle`] owned by the balancer.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use tokio::runtime::Runtime;
use tracing::{debug, error, warn};

use crate::config::BalancerConfig;
use crate::core::heap::{Loaded, WorkerId};
use crate::core::stats::BalancerCounters;
use crate::core::task::{Envelope, TaskMetadata, TaskResult};
use crate::core::{BalancerError, WorkerExecutor};

/// Identifies one incarnation of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkerTicket {
    pub id: WorkerId,
    pub generation: u32,
}

impl WorkerTicket {
    pub const fn first(id: WorkerId) -> Self {
        Self { id, generation: 0 }
    }

    pub const fn next(self) -> Self {
        Self {
            id: self.id,
            generation: self.generation.wrapping_add(1),
        }
    }
}

/// Signals sent from workers to the balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerEvent {
    /// The worker finished a task, successfully or not.
    Completed(WorkerTicket),
    /// The worker thread ended.
    Exited(WorkerTicket),
}

/// Balancer-side record of a worker.
pub(crate) struct WorkerHandle<P, R> {
    pub ticket: WorkerTicket,
    pub inbound: Sender<Envelope<P, R>>,
    /// Tasks assigned and not yet completed. Written only by the balancer.
    pub load: usize,
    pub retired: bool,
    /// Respawns of this slot since a worker in it last completed a task.
    pub respawns: u32,
    pub thread: Option<JoinHandle<()>>,
}

impl<P, R> WorkerHandle<P, R> {
    /// A handle with no thread behind it; the caller owns the receiving end.
    pub fn detached(ticket: WorkerTicket, inbound: Sender<Envelope<P, R>>) -> Self {
        Self {
            ticket,
            inbound,
            load: 0,
            retired: false,
            respawns: 0,
            thread: None,
        }
    }
}

impl<P, R> Loaded for WorkerHandle<P, R> {
    fn load(&self) -> usize {
        self.load
    }
}

/// Creates the worker for a slot. Used at startup and to replace dead workers.
pub(crate) type Spawner<P, R> =
    Box<dyn FnMut(WorkerTicket) -> Result<WorkerHandle<P, R>, BalancerError> + Send + 'static>;

/// Build a spawner that starts real worker threads.
pub(crate) fn thread_spawner<P, R, E>(
    config: &BalancerConfig,
    executor: E,
    events: Sender<WorkerEvent>,
    counters: Arc<BalancerCounters>,
) -> Spawner<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    let queue_capacity = config.queue_capacity;
    let stack_size = config.thread_stack_size;
    let prefix = config.thread_name_prefix.clone();

    Box::new(move |ticket| {
        // The task in the worker's hands counts toward capacity.
        let (inbound, tasks) = bounded(queue_capacity.saturating_sub(1));
        let executor = executor.clone();
        let events = events.clone();
        let counters = Arc::clone(&counters);

        let thread = thread::Builder::new()
            .name(format!("{prefix}-{}", ticket.id))
            .stack_size(stack_size)
            .spawn(move || worker_loop(ticket, &tasks, &events, &counters, &executor))
            .map_err(|e| {
                BalancerError::Internal(format!("failed to spawn worker {}: {e}", ticket.id))
            })?;

        Ok(WorkerHandle {
            thread: Some(thread),
            ..WorkerHandle::detached(ticket, inbound)
        })
    })
}

/// Reports the thread's end to the balancer, including on unwind.
struct ExitGuard<'a> {
    ticket: WorkerTicket,
    events: &'a Sender<WorkerEvent>,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        let _ = self.events.send(WorkerEvent::Exited(self.ticket));
    }
}

fn worker_loop<P, R, E>(
    ticket: WorkerTicket,
    tasks: &Receiver<Envelope<P, R>>,
    events: &Sender<WorkerEvent>,
    counters: &BalancerCounters,
    executor: &E,
) where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    let _exit = ExitGuard { ticket, events };
    let worker_id = ticket.id;
    debug!(worker_id = worker_id, generation = ticket.generation, "Worker thread started");

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(worker_id = worker_id, error = %e, "Failed to create worker runtime");
            return;
        }
    };

    // Blocks with no timeout; a closed queue means shutdown.
    while let Ok(envelope) = tasks.recv() {
        let Envelope {
            payload,
            meta,
            reply,
        } = envelope;
        let task_id = meta.id;

        debug!(worker_id = worker_id, task_id = task_id, "Worker executing task");
        let outcome = run_task(&rt, executor, payload, meta);

        match &outcome {
            Ok(_) => {
                counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id = worker_id, task_id = task_id, "Worker completed task");
            }
            Err(e) => {
                counters.failed_tasks.fetch_add(1, Ordering::Relaxed);
                warn!(worker_id = worker_id, task_id = task_id, error = %e, "Task failed");
            }
        }

        if reply.send(outcome).is_err() {
            debug!(
                worker_id = worker_id,
                task_id = task_id,
                "Requester dropped its handle; result discarded"
            );
        }

        if events.send(WorkerEvent::Completed(ticket)).is_err() {
            debug!(worker_id = worker_id, "Balancer gone, worker exiting");
            break;
        }
    }

    debug!(worker_id = worker_id, "Worker thread exiting");
}

/// Run one task to completion, converting errors, timeouts and panics into
/// the requester-facing result.
///
/// A future that awaits is cancelled when its run timeout fires. Work that
/// blocks the thread instead, such as an [`Operation`](crate::core::Operation)
/// closure, cannot be interrupted: it runs to the end and an overrun is then
/// reported as `TaskTimeout`, discarding its value.
fn run_task<P, R, E>(rt: &Runtime, executor: &E, payload: P, meta: TaskMetadata) -> TaskResult<R>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    let task_id = meta.id;
    let limit = meta.timeout();
    let started = Instant::now();

    let run = AssertUnwindSafe(move || {
        rt.block_on(async move {
            let fut = executor.execute(payload, meta);
            let executed = match limit {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(executed) if started.elapsed() <= limit => executed,
                    _ => {
                        return Err(BalancerError::TaskTimeout {
                            task_id,
                            timeout_ms: millis(limit),
                        })
                    }
                },
                None => fut.await,
            };
            executed.map_err(|e| BalancerError::TaskFailure {
                task_id,
                reason: format!("{e:#}"),
            })
        })
    });

    panic::catch_unwind(run).unwrap_or_else(|panic| {
        Err(BalancerError::TaskFailure {
            task_id,
            reason: format!("panicked: {}", panic_message(panic.as_ref())),
        })
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
