//! Declared variable accesses of a message or a worker reservation.

use crate::error::{Result, SchedulerError};
use serde::{Deserialize, Serialize};

/// Read and write masks over the scheduler's variable indices.
///
/// Both vectors always have exactly `vars_count` entries; [`AccessSet::new`] rejects anything
/// else instead of padding or truncating. Deserialization goes through the same check.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawAccessSet")]
pub struct AccessSet {
    reads: Vec<bool>,
    writes: Vec<bool>,
}

/// Unchecked wire form of [`AccessSet`].
#[derive(Deserialize)]
struct RawAccessSet {
    reads: Vec<bool>,
    writes: Vec<bool>,
}

impl TryFrom<RawAccessSet> for AccessSet {
    type Error = SchedulerError;

    fn try_from(raw: RawAccessSet) -> Result<Self> {
        AccessSet::new(raw.reads.len(), raw.reads, raw.writes)
    }
}

impl AccessSet {
    /// Build from raw masks, checking both against `vars_count`.
    ///
    /// # Errors
    /// [`SchedulerError::AccessLength`] unless both masks have exactly `vars_count` entries
    pub fn new(vars_count: usize, reads: Vec<bool>, writes: Vec<bool>) -> Result<Self> {
        let set = Self { reads, writes };
        set.check_len(vars_count)?;
        Ok(set)
    }

    /// A set touching nothing.
    pub fn empty(vars_count: usize) -> Self {
        Self {
            reads: vec![false; vars_count],
            writes: vec![false; vars_count],
        }
    }

    /// Build from index lists, rejecting out-of-range indices.
    pub fn from_indices(vars_count: usize, reads: &[usize], writes: &[usize]) -> Result<Self> {
        let mut set = Self::empty(vars_count);
        for &index in reads.iter().chain(writes) {
            if index >= vars_count {
                return Err(SchedulerError::VariableOutOfRange { index, vars_count });
            }
        }
        for &index in reads {
            set.reads[index] = true;
        }
        for &index in writes {
            set.writes[index] = true;
        }
        Ok(set)
    }

    pub fn vars_count(&self) -> usize {
        self.reads.len()
    }

    /// Fail unless both masks have exactly `vars_count` entries.
    pub fn check_len(&self, vars_count: usize) -> Result<()> {
        if self.reads.len() != vars_count || self.writes.len() != vars_count {
            return Err(SchedulerError::AccessLength {
                expected: vars_count,
                reads: self.reads.len(),
                writes: self.writes.len(),
            });
        }
        Ok(())
    }

    pub fn reads(&self) -> &[bool] {
        &self.reads
    }

    pub fn writes(&self) -> &[bool] {
        &self.writes
    }

    pub fn reads_var(&self, index: usize) -> bool {
        self.reads[index]
    }

    pub fn writes_var(&self, index: usize) -> bool {
        self.writes[index]
    }

    /// Read or written.
    pub fn touches(&self, index: usize) -> bool {
        self.reads[index] || self.writes[index]
    }

    /// True when no variable is read or written.
    pub fn is_empty(&self) -> bool {
        !self.reads.iter().chain(&self.writes).any(|flag| *flag)
    }

    pub(crate) fn mark_read(&mut self, index: usize) {
        self.reads[index] = true;
    }

    pub(crate) fn mark_write(&mut self, index: usize) {
        self.writes[index] = true;
    }

    #[cfg(test)]
    pub(crate) fn uneven(reads: Vec<bool>, writes: Vec<bool>) -> Self {
        Self { reads, writes }
    }

    /// Indices this set reads.
    pub fn read_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.reads.iter().enumerate().filter(|(_, r)| **r).map(|(i, _)| i)
    }

    /// Indices this set writes.
    pub fn write_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.writes.iter().enumerate().filter(|(_, w)| **w).map(|(i, _)| i)
    }

    /// Whether two sets may not run together under read/write isolation:
    /// any variable touched by both.
    pub fn overlaps(&self, other: &AccessSet) -> bool {
        (0..self.vars_count().min(other.vars_count()))
            .any(|i| self.touches(i) && other.touches(i))
    }

    /// Whether `self` writes something `other` touches, or the reverse.
    pub fn write_conflicts(&self, other: &AccessSet) -> bool {
        (0..self.vars_count().min(other.vars_count())).any(|i| {
            (self.writes[i] && other.touches(i)) || (other.writes[i] && self.touches(i))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_lengths() {
        let err = AccessSet::new(3, vec![false; 3], vec![false; 2]).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::AccessLength {
                expected: 3,
                reads: 3,
                writes: 2
            }
        ));
        assert!(AccessSet::from_indices(2, &[2], &[]).is_err());
    }

    #[test]
    fn deserialization_rejects_uneven_masks() {
        let short_writes = r#"{"reads":[false,false,false,false],"writes":[true,false,false]}"#;
        let err = serde_json::from_str::<AccessSet>(short_writes).unwrap_err();
        assert!(err.to_string().contains("reads=4 writes=3"), "{err}");

        let long_writes = r#"{"reads":[false,false],"writes":[true,false,true]}"#;
        assert!(serde_json::from_str::<AccessSet>(long_writes).is_err());

        let even = r#"{"reads":[true,false],"writes":[false,true]}"#;
        let set: AccessSet = serde_json::from_str(even).unwrap();
        assert_eq!(set, AccessSet::from_indices(2, &[0], &[1]).unwrap());
    }

    #[test]
    fn check_len_looks_at_both_masks() {
        let set = AccessSet::from_indices(3, &[1], &[2]).unwrap();
        assert!(set.check_len(3).is_ok());
        assert!(matches!(
            set.check_len(4),
            Err(SchedulerError::AccessLength { expected: 4, reads: 3, writes: 3 })
        ));
    }

    #[test]
    fn index_builder_marks_masks() {
        let set = AccessSet::from_indices(4, &[0, 2], &[3]).unwrap();
        assert_eq!(set.read_indices().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(set.write_indices().collect::<Vec<_>>(), vec![3]);
        assert!(set.touches(3));
        assert!(!set.touches(1));
        assert!(!set.is_empty());
        assert!(AccessSet::empty(4).is_empty());
    }

    #[test]
    fn overlap_and_write_conflict() {
        let reader = AccessSet::from_indices(4, &[0], &[]).unwrap();
        let other_reader = AccessSet::from_indices(4, &[0], &[]).unwrap();
        let writer = AccessSet::from_indices(4, &[], &[0]).unwrap();
        let unrelated = AccessSet::from_indices(4, &[], &[1]).unwrap();

        assert!(reader.overlaps(&other_reader));
        assert!(!reader.write_conflicts(&other_reader));
        assert!(reader.write_conflicts(&writer));
        assert!(writer.write_conflicts(&reader));
        assert!(!writer.overlaps(&unrelated));
    }
}
