//! Variable-conflict scheduler.
//!
//! Messages run concurrently against a shared state whenever their declared variable accesses
//! do not conflict with the jobs already in flight. Each job works on a private snapshot; the
//! scheduler thread folds results back into the authoritative state one merge at a time.

pub mod access;
pub mod error;
pub mod host;
pub mod locking;
pub mod priority;
pub mod queue;
pub mod scheduler;
pub mod stats;
pub mod threading;
pub mod vars;
pub mod worker;
pub mod workload;

pub use access::AccessSet;
pub use error::{Result, SchedulerError};
pub use host::{FailureKind, Host, JobFailure, JobOutcome};
pub use locking::{LockingDiscipline, ReservationTable};
pub use priority::{ControlKind, KindTable, Prioritized};
pub use queue::{dispatch_queue, DispatchQueue, DispatchSender};
pub use scheduler::{Scheduler, SchedulerConfig, Submitter};
pub use stats::{LatencySummary, SchedulerStats, StatsSnapshot};
pub use vars::VarTable;
pub use worker::Worker;
