//! The balancer loop: least-loaded dispatch and completion feedback.
//!
//! [`Dispatcher`] owns the [`PriorityPool`] outright and runs on a single
//! thread, so heap mutations are serialized without a lock. It reacts to:
//!
//! - new work on the intake: take the least-loaded worker, hand it the task,
//!   bump its load, put it back;
//! - completion signals from workers: drop the load by one and re-sort;
//! - exit signals from workers: take the worker out of rotation and respawn
//!   or retire it;
//! - snapshot requests from the facade.
//!
//! Events are handled one at a time in the order `select!` makes them ready.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{never, select, Receiver, SendTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use crate::config::Backpressure;
use crate::core::heap::{PriorityPool, WorkerId};
use crate::core::stats::{BalancerCounters, PoolSnapshot, WorkerLoad};
use crate::core::task::Envelope;
use crate::core::worker::{Spawner, WorkerEvent, WorkerHandle, WorkerTicket};
use crate::core::BalancerError;

/// Consecutive respawns allowed for a slot whose workers die without
/// completing a task. The next loss retires the slot.
pub(crate) const RESPAWN_LIMIT: u32 = 3;

/// Requests from the facade that need the balancer's view of the pool.
pub(crate) enum Control {
    Snapshot(Sender<PoolSnapshot>),
}

/// Outcome of one loop iteration.
enum Step {
    Continue,
    Stop,
    EventsClosed,
    ControlClosed,
}

/// Why a worker did not take a task.
enum Refused<P, R> {
    Full(Envelope<P, R>),
    Gone(Envelope<P, R>),
}

/// Single-writer owner of the worker pool.
pub(crate) struct Dispatcher<P, R> {
    pool: PriorityPool<WorkerHandle<P, R>>,
    /// Sum of all worker loads.
    in_flight: usize,
    /// Tasks a worker may hold, running or queued, before it counts as full.
    queue_capacity: usize,
    backpressure: Backpressure,
    counters: Arc<BalancerCounters>,
    /// Replaces dead workers; `None` retires them instead.
    respawn: Option<Spawner<P, R>>,
}

impl<P, R> Dispatcher<P, R> {
    /// Build a dispatcher over freshly started workers. Worker `i` must carry
    /// ticket id `i`.
    pub fn new(
        workers: Vec<WorkerHandle<P, R>>,
        queue_capacity: usize,
        backpressure: Backpressure,
        counters: Arc<BalancerCounters>,
        respawn: Option<Spawner<P, R>>,
    ) -> Self {
        let mut pool = PriorityPool::with_capacity(workers.len());
        for worker in workers {
            let expected = worker.ticket.id;
            let id = pool.add(worker);
            debug_assert_eq!(id, expected, "workers must be passed in id order");
        }
        counters.live_workers.store(pool.len(), Ordering::Relaxed);

        Self {
            pool,
            in_flight: 0,
            queue_capacity,
            backpressure,
            counters,
            respawn,
        }
    }

    /// Run until the intake closes, then close worker queues and wait for the
    /// workers to drain.
    pub fn run(
        mut self,
        intake: Receiver<Envelope<P, R>>,
        events: Receiver<WorkerEvent>,
        control: Receiver<Control>,
    ) {
        info!(workers = self.pool.len(), "Balancer loop started");

        let mut events = events;
        let mut control = control;

        loop {
            let step = select! {
                recv(intake) -> msg => match msg {
                    Ok(envelope) => {
                        self.dispatch(envelope);
                        Step::Continue
                    }
                    // Buffered tasks are always received before disconnection.
                    Err(_) => Step::Stop,
                },
                recv(events) -> msg => match msg {
                    Ok(WorkerEvent::Completed(ticket)) => {
                        self.completed(ticket);
                        Step::Continue
                    }
                    Ok(WorkerEvent::Exited(ticket)) => {
                        self.exited(ticket);
                        Step::Continue
                    }
                    Err(_) => Step::EventsClosed,
                },
                recv(control) -> msg => match msg {
                    Ok(Control::Snapshot(reply)) => {
                        let _ = reply.send(self.snapshot());
                        Step::Continue
                    }
                    Err(_) => Step::ControlClosed,
                },
            };

            match step {
                Step::Continue => {}
                Step::Stop => break,
                Step::EventsClosed => {
                    debug!("All worker event senders gone");
                    events = never();
                }
                Step::ControlClosed => control = never(),
            }
        }

        info!(in_flight = self.in_flight, "Intake closed, draining workers");
        self.close();
    }

    /// Hand a task to the least-loaded live worker.
    pub fn dispatch(&mut self, envelope: Envelope<P, R>) {
        let task_id = envelope.id();
        let mut envelope = envelope;

        loop {
            if self.pool.is_empty() {
                warn!(task_id = task_id, "No live worker to accept task");
                self.counters.rejected_tasks.fetch_add(1, Ordering::Relaxed);
                envelope.fail(BalancerError::WorkerUnavailable { task_id });
                return;
            }

            let id = self.pool.extract_min();
            let Some(worker) = self.pool.detached_mut(id) else {
                unreachable!("extracted worker {id} must be detached");
            };

            match Self::hand_over(worker, envelope, self.queue_capacity, self.backpressure) {
                Ok(()) => {
                    worker.load += 1;
                    let load = worker.load;
                    self.pool.insert(id);
                    self.in_flight += 1;
                    self.counters.dispatched_tasks.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        worker_id = id,
                        task_id = task_id,
                        load = load,
                        "Dispatched task"
                    );
                    return;
                }
                Err(Refused::Full(returned)) => {
                    self.pool.insert(id);
                    self.counters.rejected_tasks.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        worker_id = id,
                        task_id = task_id,
                        "Least-loaded worker queue is full, rejecting task"
                    );
                    returned.fail(BalancerError::QueueSaturated(format!(
                        "worker {id} queue is full"
                    )));
                    return;
                }
                Err(Refused::Gone(returned)) => {
                    self.lose_worker(id);
                    envelope = returned;
                }
            }
        }
    }

    /// Put a task on a worker's queue.
    ///
    /// Saturation is judged by load, not by the channel: a worker holding
    /// fewer than `queue_capacity` tasks always has room, so the send only
    /// waits for it to reach its next `recv`. A full worker is handled by
    /// the backpressure policy.
    fn hand_over(
        worker: &WorkerHandle<P, R>,
        envelope: Envelope<P, R>,
        queue_capacity: usize,
        backpressure: Backpressure,
    ) -> Result<(), Refused<P, R>> {
        if worker.load < queue_capacity {
            return worker
                .inbound
                .send(envelope)
                .map_err(|e| Refused::Gone(e.into_inner()));
        }

        match backpressure {
            Backpressure::Reject => Err(Refused::Full(envelope)),
            Backpressure::Block => {
                debug!(
                    worker_id = worker.ticket.id,
                    load = worker.load,
                    "Worker queue full, dispatch blocking"
                );
                worker
                    .inbound
                    .send(envelope)
                    .map_err(|e| Refused::Gone(e.into_inner()))
            }
            Backpressure::Wait { timeout_ms } => {
                debug!(
                    worker_id = worker.ticket.id,
                    timeout_ms = timeout_ms,
                    "Worker queue full, dispatch waiting"
                );
                worker
                    .inbound
                    .send_timeout(envelope, Duration::from_millis(timeout_ms))
                    .map_err(|e| match e {
                        SendTimeoutError::Timeout(e) => Refused::Full(e),
                        SendTimeoutError::Disconnected(e) => Refused::Gone(e),
                    })
            }
        }
    }

    /// A worker finished a task: one less outstanding, re-sort.
    pub fn completed(&mut self, ticket: WorkerTicket) {
        if !self.is_current(ticket) {
            debug!(
                worker_id = ticket.id,
                generation = ticket.generation,
                "Ignoring completion from a replaced worker"
            );
            return;
        }
        let Some(position) = self.pool.position(ticket.id) else {
            return;
        };

        let id = self.pool.remove_at(position);
        let Some(worker) = self.pool.detached_mut(id) else {
            unreachable!("removed worker {id} must be detached");
        };
        // A worker that finishes a task is healthy.
        worker.respawns = 0;
        if worker.load == 0 {
            error!(worker_id = id, "Completion without outstanding load, ignoring");
        } else {
            worker.load -= 1;
            self.in_flight -= 1;
        }
        let load = worker.load;
        self.pool.insert(id);

        debug!(worker_id = id, load = load, "Task completion recorded");
    }

    /// A worker thread ended. Between events every live worker is in the heap.
    pub fn exited(&mut self, ticket: WorkerTicket) {
        if !self.is_current(ticket) {
            return;
        }
        let Some(position) = self.pool.position(ticket.id) else {
            return;
        };
        let id = self.pool.remove_at(position);
        self.lose_worker(id);
    }

    /// Take a detached worker out of rotation, then respawn it if configured
    /// and the slot is under [`RESPAWN_LIMIT`].
    fn lose_worker(&mut self, id: WorkerId) {
        let Some(worker) = self.pool.detached_mut(id) else {
            unreachable!("lost worker {id} must be detached");
        };
        let abandoned = std::mem::take(&mut worker.load);
        let ticket = worker.ticket;
        let respawns = worker.respawns;
        worker.retired = true;

        self.in_flight -= abandoned;
        self.counters.lost_workers.fetch_add(1, Ordering::Relaxed);
        self.counters
            .abandoned_tasks
            .fetch_add(u64::try_from(abandoned).unwrap_or(u64::MAX), Ordering::Relaxed);
        self.counters.live_workers.fetch_sub(1, Ordering::Relaxed);
        warn!(
            worker_id = id,
            generation = ticket.generation,
            abandoned = abandoned,
            "Worker is gone, removing it from rotation"
        );

        let Some(respawn) = self.respawn.as_mut() else {
            return;
        };
        if respawns >= RESPAWN_LIMIT {
            error!(
                worker_id = id,
                respawns = respawns,
                "Worker keeps dying without completing a task, slot retired"
            );
            return;
        }
        match respawn(ticket.next()) {
            Ok(mut replacement) => {
                replacement.respawns = respawns + 1;
                // The old thread has ended; dropping its handle detaches it.
                drop(self.pool.replace(id, replacement));
                self.pool.insert(id);
                self.counters.live_workers.fetch_add(1, Ordering::Relaxed);
                info!(
                    worker_id = id,
                    generation = ticket.generation.wrapping_add(1),
                    "Replacement worker started"
                );
            }
            Err(e) => {
                error!(
                    worker_id = id,
                    error = %e,
                    "Failed to respawn worker, slot retired"
                );
            }
        }
    }

    fn is_current(&self, ticket: WorkerTicket) -> bool {
        self.pool
            .get(ticket.id)
            .is_some_and(|w| w.ticket == ticket && !w.retired)
    }

    /// The pool as seen between two events.
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            workers: self
                .pool
                .slots()
                .map(|(id, position, w)| WorkerLoad {
                    id,
                    generation: w.ticket.generation,
                    load: w.load,
                    position,
                })
                .collect(),
            in_flight: self.in_flight,
            heap_valid: self.pool.is_valid(),
        }
    }

    /// Close every worker queue, then join the worker threads.
    fn close(self) {
        let mut threads = Vec::new();
        for mut worker in self.pool.into_entries() {
            if let Some(thread) = worker.thread.take() {
                threads.push((worker.ticket.id, thread));
            }
        }

        let count = threads.len();
        for (worker_id, thread) in threads {
            if thread.join().is_err() {
                warn!(worker_id = worker_id, "Worker panicked");
            } else {
                debug!(worker_id = worker_id, "Worker joined");
            }
        }
        self.counters.live_workers.store(0, Ordering::Relaxed);
        info!(worker_count = count, "Balancer stopped");
    }
}
