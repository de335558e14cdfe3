//! Worker actor: one OS thread draining one priority inbox, one job at a time.
//!
//! The worker knows nothing about reservations or merging. It runs whatever closure it was
//! started with on each `(state, message)` pair; the scheduler's closure reports the outcome
//! back through the scheduler's own dispatch queue. Jobs are never interrupted: `Exit` is only
//! observed between jobs.

use crate::error::{Result, SchedulerError};
use crate::priority::{ControlKind, Prioritized};
use crate::queue::{dispatch_queue, DispatchQueue, DispatchSender};
use crate::threading::set_thread_core;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace};

/// Inbox item of a worker.
enum WorkerCommand<S, M> {
    Run { state: S, message: M },
    Exit,
    LazyExit,
}

impl<S, M> Prioritized for WorkerCommand<S, M> {
    fn kind(&self) -> ControlKind {
        match self {
            WorkerCommand::Run { .. } => ControlKind::Process,
            WorkerCommand::Exit => ControlKind::Exit,
            WorkerCommand::LazyExit => ControlKind::LazyExit,
        }
    }
}

/// Counters shared between a worker handle and its thread.
#[derive(Debug, Default)]
struct WorkerCounters {
    /// Jobs handed over and not yet returned from the closure.
    in_flight: AtomicUsize,
    /// Jobs whose closure returned.
    completed: AtomicU64,
}

/// Handle to a running worker thread.
pub struct Worker<S, M> {
    index: usize,
    inbox: DispatchSender<WorkerCommand<S, M>>,
    counters: Arc<WorkerCounters>,
    handle: Option<JoinHandle<()>>,
}

impl<S: Send + 'static, M: Send + 'static> Worker<S, M> {
    /// Spawn the worker thread. It blocks on its inbox until the first job arrives.
    ///
    /// # Arguments
    /// * `index` - Slot number reported with every `Release`
    /// * `name` - OS thread name
    /// * `core` - Core to pin the thread to, when set (Linux only)
    /// * `process` - Runs one job; called on the worker thread
    ///
    /// # Returns
    /// The running worker, or [`SchedulerError::Spawn`] if the thread could not start
    pub fn start<F>(index: usize, name: String, core: Option<usize>, process: F) -> Result<Self>
    where
        F: FnMut(S, M) + Send + 'static,
    {
        let (inbox, queue) = dispatch_queue();
        let counters = Arc::new(WorkerCounters::default());
        let thread_counters = counters.clone();
        let handle = thread::Builder::new().name(name).spawn(move || {
            if let Some(core_id) = core {
                set_thread_core(core_id);
            }
            run_worker(index, queue, thread_counters, process);
        })?;
        Ok(Self {
            index,
            inbox,
            counters,
            handle: Some(handle),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Hand over exactly one job.
    ///
    /// A job scheduled while another is still running waits in the inbox and starts as soon as
    /// the current one returns; the scheduler never lets more than one job be outstanding.
    pub fn schedule(&self, state: S, message: M) -> Result<()> {
        self.counters.in_flight.fetch_add(1, Ordering::AcqRel);
        self.inbox
            .push(WorkerCommand::Run { state, message })
            .map_err(|_| {
                self.counters.in_flight.fetch_sub(1, Ordering::AcqRel);
                SchedulerError::Stopped
            })
    }

    /// Whether a job has been handed over and its closure has not returned yet.
    pub fn is_busy(&self) -> bool {
        self.counters.in_flight.load(Ordering::Acquire) > 0
    }

    /// Number of jobs this worker has finished.
    pub fn completed_jobs(&self) -> u64 {
        self.counters.completed.load(Ordering::Relaxed)
    }

    /// Ask the thread to exit and join it.
    ///
    /// `wait = true` queues a `LazyExit` behind any job still in the inbox; `wait = false` sends
    /// `Exit`, which overtakes queued jobs. A job already running always finishes first.
    pub fn stop(mut self, wait: bool) -> Result<()> {
        self.shutdown(wait)
    }

    fn shutdown(&mut self, wait: bool) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let command = if wait {
            WorkerCommand::LazyExit
        } else {
            WorkerCommand::Exit
        };
        // The thread may already be gone; joining still reports how it ended.
        let _ = self.inbox.push(command);
        handle
            .join()
            .map_err(|_| SchedulerError::Panicked("worker"))
    }
}

impl<S, M> Drop for Worker<S, M> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.inbox.push(WorkerCommand::Exit);
            let _ = handle.join();
        }
    }
}

fn run_worker<S, M, F>(
    index: usize,
    inbox: DispatchQueue<WorkerCommand<S, M>>,
    counters: Arc<WorkerCounters>,
    mut process: F,
) where
    F: FnMut(S, M),
{
    debug!(worker = index, "worker started");
    while let Some(command) = inbox.pop() {
        match command {
            WorkerCommand::Run { state, message } => {
                trace!(worker = index, "job started");
                process(state, message);
                counters.completed.fetch_add(1, Ordering::Relaxed);
                counters.in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            WorkerCommand::Exit | WorkerCommand::LazyExit => break,
        }
    }
    debug!(worker = index, "worker stopped");
}
