//! Admission-controlled dispatcher.
//!
//! One scheduler thread owns the authoritative state, the reservation table and the worker pool.
//! Everything reaches it through a single [`DispatchQueue`]: callers push `Process`, workers push
//! `Release`, the loop itself pushes `Reprocess`, and [`Scheduler::stop`] pushes `Exit` or
//! `LazyExit`. Because only that thread touches state and reservations, neither needs a lock.

use crate::access::AccessSet;
use crate::error::{Result, SchedulerError};
use crate::host::{FailureKind, Host, JobFailure, JobOutcome};
use crate::locking::{LockingDiscipline, ReservationTable};
use crate::priority::{ControlKind, Prioritized};
use crate::queue::{dispatch_queue, DispatchQueue, DispatchSender};
use crate::stats::{SchedulerStats, StatsSnapshot};
use crate::vars::VarTable;
use crate::worker::Worker;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Scheduler construction knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Consistency discipline used by the admission test.
    pub discipline: LockingDiscipline,
    /// Size of the worker pool. Must be positive.
    pub workers: usize,
    /// Optional core per worker, by worker index. Missing entries leave the worker unpinned.
    pub worker_cores: Vec<usize>,
    /// Thread names are `<prefix>-dispatch` and `<prefix>-worker-<i>`.
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            discipline: LockingDiscipline::RWLocking,
            workers: 4,
            worker_cores: Vec::new(),
            thread_name_prefix: "vardispatch".to_string(),
        }
    }
}

/// A submitted message with its expanded access set.
struct Pending<M> {
    message: M,
    access: AccessSet,
    submitted: Instant,
}

/// Everything the scheduler thread consumes.
enum Control<S, M> {
    Process(Pending<M>),
    Reprocess(Pending<M>),
    Release {
        worker: usize,
        outcome: JobOutcome<S>,
    },
    Exit,
    LazyExit,
}

impl<S, M> Prioritized for Control<S, M> {
    fn kind(&self) -> ControlKind {
        match self {
            Control::Process(_) => ControlKind::Process,
            Control::Reprocess(_) => ControlKind::Reprocess,
            Control::Release { .. } => ControlKind::Release,
            Control::Exit => ControlKind::Exit,
            Control::LazyExit => ControlKind::LazyExit,
        }
    }
}

type ControlOf<H> = Control<<H as Host>::State, <H as Host>::Message>;
type WorkerOf<H> = Worker<<H as Host>::State, <H as Host>::Message>;

/// Cloneable submission handle, usable from any thread.
pub struct Submitter<H: Host> {
    host: Arc<H>,
    vars: Arc<VarTable>,
    sender: DispatchSender<ControlOf<H>>,
    stats: Arc<SchedulerStats>,
}

impl<H: Host> Clone for Submitter<H> {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            vars: self.vars.clone(),
            sender: self.sender.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<H: Host> Submitter<H> {
    /// Queue `message` for admission.
    ///
    /// The access set is taken from [`Host::message_vars`] here, validated against the variable
    /// count, and expanded over the variable hierarchy. Malformed declarations fail now rather
    /// than on the scheduler thread.
    ///
    /// # Errors
    /// * [`SchedulerError::AccessLength`] - A mask does not have one entry per variable
    /// * [`SchedulerError::Stopped`] - The scheduler has already been stopped
    pub fn schedule(&self, message: H::Message) -> Result<()> {
        let raw = self.host.message_vars(&message);
        let access = self.vars.expand(&raw)?;
        let pending = Pending {
            message,
            access,
            submitted: Instant::now(),
        };
        self.sender
            .push(Control::Process(pending))
            .map_err(|_| SchedulerError::Stopped)?;
        self.stats.record_submitted();
        Ok(())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// Runs host messages concurrently whenever their declared accesses allow it.
pub struct Scheduler<H: Host> {
    submitter: Submitter<H>,
    config: SchedulerConfig,
    queue: Option<DispatchQueue<ControlOf<H>>>,
    initial: Option<H::State>,
    handle: Option<JoinHandle<(H::State, Vec<WorkerOf<H>>)>>,
}

impl<H: Host> Scheduler<H> {
    /// Build a stopped scheduler over `vars`, owning `initial` as the authoritative state.
    ///
    /// No thread is spawned until [`Scheduler::start`]; messages scheduled before then queue up.
    ///
    /// # Arguments
    /// * `host` - Application callbacks, shared with every worker
    /// * `initial` - Authoritative state before any merge
    /// * `vars` - Variable table; its length is the `vars_count` every access set must match
    /// * `config` - Discipline, pool size, core pinning and thread names
    ///
    /// # Returns
    /// The stopped scheduler, or [`SchedulerError::NoWorkers`] when `config.workers` is zero
    pub fn new(
        host: Arc<H>,
        initial: H::State,
        vars: VarTable,
        config: SchedulerConfig,
    ) -> Result<Self> {
        if config.workers == 0 {
            return Err(SchedulerError::NoWorkers);
        }
        let (sender, queue) = dispatch_queue();
        let stats = Arc::new(SchedulerStats::new(config.workers));
        Ok(Self {
            submitter: Submitter {
                host,
                vars: Arc::new(vars),
                sender,
                stats,
            },
            config,
            queue: Some(queue),
            initial: Some(initial),
            handle: None,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn vars(&self) -> &VarTable {
        &self.submitter.vars
    }

    pub fn vars_count(&self) -> usize {
        self.submitter.vars.len()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Start every worker, then the dispatch loop.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() || self.queue.is_none() {
            return Err(SchedulerError::AlreadyStarted);
        }
        let prefix = &self.config.thread_name_prefix;

        let mut workers = Vec::with_capacity(self.config.workers);
        for index in 0..self.config.workers {
            let core = self.config.worker_cores.get(index).copied();
            let name = format!("{prefix}-worker-{index}");
            let job = worker_job(index, self.submitter.host.clone(), self.submitter.sender.clone());
            workers.push(Worker::start(index, name, core, job)?);
        }

        let (Some(queue), Some(initial)) = (self.queue.take(), self.initial.take()) else {
            return Err(SchedulerError::AlreadyStarted);
        };

        let dispatcher = Dispatcher {
            host: self.submitter.host.clone(),
            queue,
            sender: self.submitter.sender.clone(),
            table: ReservationTable::new(
                self.config.discipline,
                self.config.workers,
                self.submitter.vars.len(),
            ),
            in_flight: vec![None; self.config.workers],
            workers,
            stats: self.submitter.stats.clone(),
            conflict_streak: 0,
        };
        let handle = thread::Builder::new()
            .name(format!("{prefix}-dispatch"))
            .spawn(move || dispatcher.run(initial))?;
        self.handle = Some(handle);

        info!(
            workers = self.config.workers,
            vars = self.submitter.vars.len(),
            discipline = %self.config.discipline,
            "scheduler started"
        );
        Ok(())
    }

    /// Queue `message` for admission. See [`Submitter::schedule`].
    ///
    /// Messages queued before [`Scheduler::start`] wait until the loop runs.
    pub fn schedule(&self, message: H::Message) -> Result<()> {
        self.submitter.schedule(message)
    }

    /// Handle for submitting from other threads.
    pub fn submitter(&self) -> Submitter<H> {
        self.submitter.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.submitter.stats.snapshot()
    }

    /// Stop the loop and every worker, returning the final authoritative state.
    ///
    /// `wait = true` lets every queued message run first; callers must not schedule more after
    /// asking for it. `wait = false` drops undispatched messages. Either way, jobs already on a
    /// worker finish and their results are merged before this returns.
    ///
    /// # Returns
    /// The final authoritative state, or the initial one when the scheduler never started
    pub fn stop(mut self, wait: bool) -> Result<H::State> {
        let Some(handle) = self.handle.take() else {
            return self.initial.take().ok_or(SchedulerError::NotStarted);
        };
        let command = if wait {
            Control::LazyExit
        } else {
            Control::Exit
        };
        // A failed push means the loop already exited; the join below reports how.
        let _ = self.submitter.sender.push(command);
        let (state, workers) = handle
            .join()
            .map_err(|_| SchedulerError::Panicked("scheduler"))?;

        let mut result = Ok(());
        for worker in workers {
            let stopped = worker.stop(wait);
            if result.is_ok() {
                result = stopped;
            }
        }
        result?;
        info!(stats = ?self.submitter.stats.snapshot(), "scheduler stopped");
        Ok(state)
    }
}

impl<H: Host> Drop for Scheduler<H> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.submitter.sender.push(Control::Exit);
            let _ = handle.join();
        }
    }
}

/// Closure run on worker `index`: process, then report through `Release`.
fn worker_job<H: Host>(
    index: usize,
    host: Arc<H>,
    sender: DispatchSender<ControlOf<H>>,
) -> impl FnMut(H::State, H::Message) + Send + 'static {
    move |mut state: H::State, message: H::Message| {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            host.process(index, &mut state, message)
        }));
        let outcome = match result {
            Ok(Ok(())) => JobOutcome::Completed(state),
            Ok(Err(err)) => JobOutcome::Failed(JobFailure {
                worker: index,
                kind: FailureKind::Error,
                reason: err.to_string(),
            }),
            Err(payload) => JobOutcome::Failed(JobFailure {
                worker: index,
                kind: FailureKind::Panic,
                reason: panic_message(payload.as_ref()),
            }),
        };
        if sender
            .push(Control::Release {
                worker: index,
                outcome,
            })
            .is_err()
        {
            warn!(worker = index, "scheduler gone, dropping job result");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// State owned by the scheduler thread.
struct Dispatcher<H: Host> {
    host: Arc<H>,
    queue: DispatchQueue<ControlOf<H>>,
    sender: DispatchSender<ControlOf<H>>,
    table: ReservationTable,
    /// Submission time of the job on each busy slot; `None` means the slot is idle.
    in_flight: Vec<Option<Instant>>,
    workers: Vec<WorkerOf<H>>,
    stats: Arc<SchedulerStats>,
    /// Conflict requeues since the reservation table last changed.
    conflict_streak: usize,
}

impl<H: Host> Dispatcher<H> {
    fn run(mut self, mut state: H::State) -> (H::State, Vec<WorkerOf<H>>) {
        loop {
            let Some(control) = self.queue.pop() else {
                break;
            };
            match control {
                Control::Exit => {
                    debug!("exit requested");
                    state = self.drain_in_flight(state);
                    break;
                }
                Control::LazyExit => {
                    if self.is_idle() {
                        debug!("lazy exit: queue drained");
                        break;
                    }
                    self.requeue_lazy_exit();
                    if self.busy_workers() > 0 {
                        self.queue
                            .wait_for(&[ControlKind::Release, ControlKind::Exit]);
                    }
                }
                Control::Release { worker, outcome } => {
                    state = self.release(state, worker, outcome);
                }
                Control::Process(pending) | Control::Reprocess(pending) => {
                    self.admit(&state, pending);
                }
            }
        }
        (state, self.workers)
    }

    /// Try to dispatch `pending`, requeueing it on capacity or conflict.
    fn admit(&mut self, state: &H::State, pending: Pending<H::Message>) {
        let Some(slot) = self.free_slot() else {
            self.stats.record_capacity_wait();
            self.reschedule(pending);
            trace!("no free worker, waiting for a release");
            self.queue
                .wait_for(&[ControlKind::Release, ControlKind::Exit]);
            return;
        };

        let schedulable = match self.table.is_schedulable(&pending.access) {
            Ok(schedulable) => schedulable,
            Err(err) => {
                warn!(error = %err, "dropping message with malformed access set");
                return;
            }
        };
        if !schedulable {
            self.stats.record_conflict_requeue();
            self.conflict_streak += 1;
            self.reschedule(pending);
            if self.queue.lane_len(ControlKind::Process) == 0
                && self.conflict_streak >= self.queue.lane_len(ControlKind::Reprocess)
            {
                // Every waiting message already lost against the current reservations.
                trace!(
                    waiting = self.conflict_streak,
                    "all pending messages conflict, waiting"
                );
                self.queue.wait_for(&[
                    ControlKind::Release,
                    ControlKind::Process,
                    ControlKind::Exit,
                ]);
            }
            return;
        }

        let Pending {
            message,
            access,
            submitted,
        } = pending;
        if let Err(err) = self.table.reserve(slot, access) {
            warn!(worker = slot, error = %err, "reservation rejected");
            return;
        }
        self.in_flight[slot] = Some(submitted);
        self.conflict_streak = 0;

        let snapshot = self.host.acquire_state(state);
        if let Err(err) = self.workers[slot].schedule(snapshot, message) {
            warn!(worker = slot, error = %err, "worker refused job, message lost");
            self.table.release(slot);
            self.in_flight[slot] = None;
            return;
        }
        self.stats.record_dispatch(slot, submitted.elapsed());
        debug!(worker = slot, "dispatched");
    }

    /// Merge a finished job and free its slot. Never refused.
    fn release(
        &mut self,
        state: H::State,
        worker: usize,
        outcome: JobOutcome<H::State>,
    ) -> H::State {
        let Some(access) = self.table.release(worker) else {
            warn!(worker, "release for a worker with no reservation");
            return state;
        };
        let submitted = self.in_flight.get_mut(worker).and_then(Option::take);
        self.conflict_streak = 0;

        match outcome {
            JobOutcome::Completed(result) => {
                let merged = self.host.merge_states(state, result, access.writes());
                self.host.state_merged(&merged, access.writes());
                self.stats
                    .record_merge(submitted.map_or(Duration::ZERO, |at| at.elapsed()));
                debug!(worker, "merged");
                merged
            }
            JobOutcome::Failed(failure) => {
                self.stats.record_failure();
                warn!(
                    worker,
                    kind = ?failure.kind,
                    reason = %failure.reason,
                    "job failed, merge skipped"
                );
                self.host.job_failed(&failure);
                state
            }
        }
    }

    fn reschedule(&self, pending: Pending<H::Message>) {
        // The loop holds its own sender, so the queue cannot be disconnected here.
        let _ = self.sender.push(Control::Reprocess(pending));
    }

    fn requeue_lazy_exit(&self) {
        let _ = self.sender.push(Control::LazyExit);
    }

    /// After `Exit`: drop undispatched work, but merge every job still on a worker.
    fn drain_in_flight(&mut self, mut state: H::State) -> H::State {
        while self.busy_workers() > 0 {
            let Some(control) = self.queue.pop() else {
                break;
            };
            match control {
                Control::Release { worker, outcome } => {
                    state = self.release(state, worker, outcome);
                }
                Control::Process(_) | Control::Reprocess(_) => self.stats.record_abandoned(),
                Control::Exit | Control::LazyExit => {}
            }
        }
        while let Some(control) = self.queue.try_pop() {
            if matches!(control, Control::Process(_) | Control::Reprocess(_)) {
                self.stats.record_abandoned();
            }
        }
        let abandoned = self.stats.snapshot().abandoned;
        if abandoned > 0 {
            warn!(abandoned, "exit dropped undispatched messages");
        }
        state
    }

    fn free_slot(&self) -> Option<usize> {
        self.in_flight.iter().position(Option::is_none)
    }

    fn busy_workers(&self) -> usize {
        self.in_flight.iter().filter(|slot| slot.is_some()).count()
    }

    fn is_idle(&self) -> bool {
        self.busy_workers() == 0
            && !self.queue.has_pending(&[
                ControlKind::Process,
                ControlKind::Reprocess,
                ControlKind::Release,
            ])
    }
}
