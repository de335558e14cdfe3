//! Control-message lanes and the ordering used by every dispatch queue.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Control-message classes ordered from most to least urgent.
///
/// The declaration order is the drain order: a queue always hands out an `Exit` before any
/// `Release`, a `Release` before any fresh `Process`, fresh work before retries, and `LazyExit`
/// only once everything else is gone. Releases outrank admissions so that capacity and
/// conflicting reservations clear before new work is tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ControlKind {
    Exit,
    Release,
    Process,
    Reprocess,
    LazyExit,
}

impl ControlKind {
    /// Ordered list of all lanes (most urgent first).
    pub const ALL: [ControlKind; 5] = [
        ControlKind::Exit,
        ControlKind::Release,
        ControlKind::Process,
        ControlKind::Reprocess,
        ControlKind::LazyExit,
    ];

    /// Stable index for lane based arrays.
    pub const fn index(self) -> usize {
        match self {
            ControlKind::Exit => 0,
            ControlKind::Release => 1,
            ControlKind::Process => 2,
            ControlKind::Reprocess => 3,
            ControlKind::LazyExit => 4,
        }
    }

}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ControlKind::Exit => "exit",
            ControlKind::Release => "release",
            ControlKind::Process => "process",
            ControlKind::Reprocess => "reprocess",
            ControlKind::LazyExit => "lazy_exit",
        };
        write!(f, "{label}")
    }
}

/// Anything that travels through a [`crate::queue::DispatchQueue`].
pub trait Prioritized {
    /// Lane this item is queued on.
    fn kind(&self) -> ControlKind;
}

/// One value per [`ControlKind`].
///
/// Mirrors the lane layout of the dispatch queues so per-lane channels and counters can be
/// indexed by kind without matching on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindTable<T> {
    values: Vec<T>,
}

impl<T> KindTable<T> {
    /// Build a table by executing a closure for each lane, in [`ControlKind::ALL`] order.
    ///
    /// # Arguments
    /// * `f` - Closure that maps each lane to its value
    pub fn from_fn(mut f: impl FnMut(ControlKind) -> T) -> Self {
        let mut values = Vec::with_capacity(ControlKind::ALL.len());
        for kind in ControlKind::ALL {
            values.push(f(kind));
        }
        KindTable { values }
    }

    pub fn get(&self, kind: ControlKind) -> &T {
        &self.values[kind.index()]
    }

    pub fn get_mut(&mut self, kind: ControlKind) -> &mut T {
        &mut self.values[kind.index()]
    }

    /// Iterate `(kind, value)` pairs from the most to the least urgent lane.
    pub fn iter(&self) -> impl Iterator<Item = (ControlKind, &T)> {
        ControlKind::ALL.iter().copied().zip(self.values.iter())
    }
}

impl<T> Index<ControlKind> for KindTable<T> {
    type Output = T;

    fn index(&self, index: ControlKind) -> &Self::Output {
        self.get(index)
    }
}

impl<T> IndexMut<ControlKind> for KindTable<T> {
    fn index_mut(&mut self, index: ControlKind) -> &mut Self::Output {
        self.get_mut(index)
    }
}
