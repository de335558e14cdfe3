//! Locking disciplines and the per-worker reservation table.
//!
//! The table keeps each slot's reservation plus two per-variable counters (how many reservations
//! read it, how many write it), so admission is one flat scan over the candidate's variables and
//! never iterates the worker list.

use crate::access::AccessSet;
use crate::error::{Result, SchedulerError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Consistency discipline chosen at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LockingDiscipline {
    /// Any reserved access, read or write, excludes every other access to that variable.
    #[default]
    RWLocking,
    /// Readers share: reads are only excluded by reserved writes, writes by any reserved access.
    WLocking,
}

impl LockingDiscipline {
    pub const ALL: [LockingDiscipline; 2] =
        [LockingDiscipline::RWLocking, LockingDiscipline::WLocking];

    /// Per-variable verdict given the reservation counters for that variable.
    #[inline]
    fn blocks(self, wants_read: bool, wants_write: bool, readers: u32, writers: u32) -> bool {
        match self {
            LockingDiscipline::RWLocking => {
                (wants_read || wants_write) && (readers > 0 || writers > 0)
            }
            LockingDiscipline::WLocking => {
                (wants_write && (readers > 0 || writers > 0)) || (wants_read && writers > 0)
            }
        }
    }
}

impl fmt::Display for LockingDiscipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LockingDiscipline::RWLocking => "rw",
            LockingDiscipline::WLocking => "w",
        };
        write!(f, "{label}")
    }
}

impl std::str::FromStr for LockingDiscipline {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "rw" | "rw-locking" | "rwlocking" | "rw_locking" => Ok(LockingDiscipline::RWLocking),
            "w" | "w-locking" | "wlocking" | "w_locking" => Ok(LockingDiscipline::WLocking),
            other => Err(format!("unknown locking discipline: {other}")),
        }
    }
}

/// Reservations held by in-flight workers.
///
/// Owned by the scheduler thread only; nothing here is synchronized.
#[derive(Debug, Clone)]
pub struct ReservationTable {
    discipline: LockingDiscipline,
    vars_count: usize,
    slots: Vec<Option<AccessSet>>,
    readers: Vec<u32>,
    writers: Vec<u32>,
}

impl ReservationTable {
    /// Empty table with one slot per worker.
    ///
    /// # Arguments
    /// * `discipline` - Rule applied by [`ReservationTable::is_schedulable`]
    /// * `workers` - Number of slots
    /// * `vars_count` - Length every access set must have
    pub fn new(discipline: LockingDiscipline, workers: usize, vars_count: usize) -> Self {
        Self {
            discipline,
            vars_count,
            slots: vec![None; workers],
            readers: vec![0; vars_count],
            writers: vec![0; vars_count],
        }
    }

    /// Admission test. Pure function of the current reservations.
    ///
    /// All-or-nothing: every variable the candidate touches must clear. A candidate touching
    /// nothing is always admitted.
    ///
    /// # Returns
    /// `true` when `candidate` may be reserved now, or [`SchedulerError::AccessLength`] if
    /// either mask has the wrong length
    pub fn is_schedulable(&self, candidate: &AccessSet) -> Result<bool> {
        self.check_len(candidate)?;
        let reads = candidate.reads();
        let writes = candidate.writes();
        let blocked = (0..self.vars_count).any(|i| {
            self.discipline
                .blocks(reads[i], writes[i], self.readers[i], self.writers[i])
        });
        Ok(!blocked)
    }

    /// Variables on which `candidate` is currently blocked, for diagnostics.
    pub fn conflicts(&self, candidate: &AccessSet) -> Result<Vec<usize>> {
        self.check_len(candidate)?;
        Ok((0..self.vars_count)
            .filter(|&i| {
                self.discipline.blocks(
                    candidate.reads_var(i),
                    candidate.writes_var(i),
                    self.readers[i],
                    self.writers[i],
                )
            })
            .collect())
    }

    /// Record `access` as the reservation of `slot`. The slot must be clear.
    pub fn reserve(&mut self, slot: usize, access: AccessSet) -> Result<()> {
        self.check_len(&access)?;
        let entry = self
            .slots
            .get_mut(slot)
            .ok_or(SchedulerError::UnknownWorker(slot))?;
        if entry.is_some() {
            return Err(SchedulerError::WorkerBusy(slot));
        }
        for i in access.read_indices() {
            self.readers[i] += 1;
        }
        for i in access.write_indices() {
            self.writers[i] += 1;
        }
        *entry = Some(access);
        Ok(())
    }

    /// Clear the reservation of `slot`, returning it.
    pub fn release(&mut self, slot: usize) -> Option<AccessSet> {
        let access = self.slots.get_mut(slot)?.take()?;
        for i in access.read_indices() {
            self.readers[i] -= 1;
        }
        for i in access.write_indices() {
            self.writers[i] -= 1;
        }
        Some(access)
    }

    /// Number of slots currently holding a reservation.
    pub fn reserved(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn check_len(&self, access: &AccessSet) -> Result<()> {
        access.check_len(self.vars_count)
    }
}
