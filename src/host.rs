//! Contract between the scheduler and the application that owns state and messages.

use crate::access::AccessSet;
use std::fmt;

/// Application side of the scheduler.
///
/// [`Host::message_vars`] runs on whichever thread submits the message, so it may be called
/// concurrently from several submitters and with the scheduler thread. [`Host::process`] runs
/// on worker threads concurrently with other `process` calls, each on its own snapshot. The
/// remaining callbacks run on the scheduler thread one call at a time, so implementations need
/// no locking around the authoritative state.
pub trait Host: Send + Sync + 'static {
    /// Authoritative state and the per-job snapshots cut from it.
    type State: Send + 'static;
    /// Unit of work.
    type Message: Send + 'static;
    /// Error a job may report instead of completing.
    type Error: fmt::Display + Send + 'static;

    /// Produce a snapshot a worker may mutate freely without aliasing `current`.
    fn acquire_state(&self, current: &Self::State) -> Self::State;

    /// Fold a finished job's state into the authoritative one, honouring only `writes`.
    fn merge_states(
        &self,
        current: Self::State,
        result: Self::State,
        writes: &[bool],
    ) -> Self::State;

    /// Variables `message` will read and write, one flag per variable index.
    ///
    /// Must be pure and callable from any thread: the scheduler evaluates it once, on the
    /// submitting thread, when the message is submitted.
    fn message_vars(&self, message: &Self::Message) -> AccessSet;

    /// Run `message` against `state` on worker `worker`.
    fn process(
        &self,
        worker: usize,
        state: &mut Self::State,
        message: Self::Message,
    ) -> Result<(), Self::Error>;

    /// Called after every merge with the new authoritative state and the merged write mask.
    ///
    /// Hosts use this to publish the merged variables, for example a read-only copy for
    /// observers outside the scheduler.
    fn state_merged(&self, _state: &Self::State, _writes: &[bool]) {}

    /// Called when a job failed; its result was discarded and the worker is free again.
    fn job_failed(&self, _failure: &JobFailure) {}
}

/// What a worker hands back through `Release`.
pub enum JobOutcome<S> {
    Completed(S),
    Failed(JobFailure),
}

impl<S> fmt::Debug for JobOutcome<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed(_) => f.write_str("Completed(..)"),
            JobOutcome::Failed(failure) => f.debug_tuple("Failed").field(failure).finish(),
        }
    }
}

/// Why a job did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub worker: usize,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// `Host::process` returned an error.
    Error,
    /// `Host::process` panicked.
    Panic,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FailureKind::Error => "failed",
            FailureKind::Panic => "panicked",
        };
        write!(f, "job on worker {} {kind}: {}", self.worker, self.reason)
    }
}
