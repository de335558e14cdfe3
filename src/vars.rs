//! Variable name table with hierarchical (dotted path) expansion.
//!
//! Hosts register every schedulable variable once at startup, e.g. `player`, `player.pos`,
//! `player.pos.x`. A declaration on a path covers the whole subtree below it, so the table
//! precomputes, for every index, the closure of that index and all of its descendants. The
//! closure is found with a sorted-prefix scan at construction time; admission afterwards only
//! ever sees flat boolean vectors.
//!
//! Because both the candidate and every reservation are expanded the same way, a declaration on
//! `player.pos` collides with a reservation on `player` (whose closure contains `player.pos`) and
//! with one on `player.pos.x` (contained in the candidate's own closure), while siblings such as
//! `player.pos` and `player.hp` stay independent.

use crate::access::AccessSet;
use crate::error::{Result, SchedulerError};
use std::collections::HashMap;

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '.';

/// Registered variables, indexed `0..len()` in registration order.
#[derive(Debug, Clone)]
pub struct VarTable {
    names: Vec<String>,
    by_name: HashMap<String, usize>,
    /// `closure[i]` holds `i` followed by every descendant index of `i`.
    closure: Vec<Vec<usize>>,
}

impl VarTable {
    /// Register `names` in order; the position of each name becomes its index.
    ///
    /// Dotted names form a hierarchy: `a.b` is a descendant of `a`. The descendant closure of
    /// every variable is computed here once.
    ///
    /// # Arguments
    /// * `names` - Variable names, unique, with no empty path segment
    ///
    /// # Returns
    /// The table, or [`SchedulerError::DuplicateVariable`] /
    /// [`SchedulerError::InvalidVariableName`]
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut by_name = HashMap::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            if name.is_empty() || name.split(PATH_SEPARATOR).any(str::is_empty) {
                return Err(SchedulerError::InvalidVariableName(name.clone()));
            }
            if by_name.insert(name.clone(), index).is_some() {
                return Err(SchedulerError::DuplicateVariable(name.clone()));
            }
        }

        // Everything under `name.` is one contiguous run in byte order.
        let mut sorted: Vec<usize> = (0..names.len()).collect();
        sorted.sort_by(|a, b| names[*a].cmp(&names[*b]));
        let closure = names
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let prefix = format!("{name}{PATH_SEPARATOR}");
                let start = sorted.partition_point(|i| names[*i].as_str() < prefix.as_str());
                let mut members = vec![index];
                members.extend(
                    sorted[start..]
                        .iter()
                        .take_while(|i| names[**i].starts_with(&prefix))
                        .copied(),
                );
                members
            })
            .collect();

        Ok(Self {
            names,
            by_name,
            closure,
        })
    }

    /// `count` independent variables named by their index (`"0"`, `"1"`, ...).
    pub fn flat(count: usize) -> Self {
        let names: Vec<String> = (0..count).map(|i| i.to_string()).collect();
        let by_name = names.iter().cloned().zip(0..count).collect();
        Self {
            names,
            by_name,
            closure: (0..count).map(|i| vec![i]).collect(),
        }
    }

    /// Number of variables (the scheduler's `vars_count`).
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// `index` and all of its descendants.
    pub fn closure(&self, index: usize) -> &[usize] {
        self.closure.get(index).map_or(&[], Vec::as_slice)
    }

    /// Whether `ancestor` is a strict path prefix of `descendant`.
    pub fn is_ancestor(&self, ancestor: usize, descendant: usize) -> bool {
        ancestor != descendant && self.closure(ancestor).contains(&descendant)
    }

    /// Build an already expanded access set from variable names.
    pub fn access_set(&self, reads: &[&str], writes: &[&str]) -> Result<AccessSet> {
        let mut set = AccessSet::empty(self.len());
        for name in reads {
            let index = self.lookup(name)?;
            for &member in &self.closure[index] {
                set.mark_read(member);
            }
        }
        for name in writes {
            let index = self.lookup(name)?;
            for &member in &self.closure[index] {
                set.mark_write(member);
            }
        }
        Ok(set)
    }

    /// Expand a raw per-index declaration so every declared path covers its subtree.
    pub fn expand(&self, raw: &AccessSet) -> Result<AccessSet> {
        raw.check_len(self.len())?;
        let mut set = AccessSet::empty(self.len());
        for index in raw.read_indices() {
            for &member in &self.closure[index] {
                set.mark_read(member);
            }
        }
        for index in raw.write_indices() {
            for &member in &self.closure[index] {
                set.mark_write(member);
            }
        }
        Ok(set)
    }

    fn lookup(&self, name: &str) -> Result<usize> {
        self.index_of(name)
            .ok_or_else(|| SchedulerError::UnknownVariable(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> VarTable {
        VarTable::new([
            "player",
            "player.pos",
            "player.pos.x",
            "player.hp",
            "player-stats",
            "world",
        ])
        .unwrap()
    }

    #[test]
    fn closure_covers_subtree_only() {
        let vars = table();
        let mut player = vars.closure(0).to_vec();
        player.sort_unstable();
        assert_eq!(player, vec![0, 1, 2, 3]);
        assert_eq!(vars.closure(1), &[1, 2]);
        assert_eq!(vars.closure(2), &[2]);
        // Shares a textual prefix but is not a child.
        assert_eq!(vars.closure(4), &[4]);
        assert!(vars.is_ancestor(0, 2));
        assert!(!vars.is_ancestor(2, 0));
        assert!(!vars.is_ancestor(1, 3));
    }

    #[test]
    fn parent_declaration_expands_to_descendants() {
        let vars = table();
        let set = vars.access_set(&["player.pos"], &["world"]).unwrap();
        assert_eq!(set.read_indices().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(set.write_indices().collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    fn descendant_meets_reserved_ancestor() {
        let vars = table();
        let parent = vars.access_set(&[], &["player"]).unwrap();
        let child = vars.access_set(&["player.pos.x"], &[]).unwrap();
        let sibling = vars.access_set(&["player.hp"], &[]).unwrap();
        let pos = vars.access_set(&[], &["player.pos"]).unwrap();
        assert!(parent.overlaps(&child));
        assert!(pos.overlaps(&child));
        assert!(!pos.overlaps(&sibling));
    }

    #[test]
    fn expand_checks_length_and_widens() {
        let vars = table();
        let raw = AccessSet::from_indices(6, &[], &[1]).unwrap();
        let expanded = vars.expand(&raw).unwrap();
        assert_eq!(expanded.write_indices().collect::<Vec<_>>(), vec![1, 2]);
        assert!(vars.expand(&AccessSet::empty(3)).is_err());
    }

    #[test]
    fn expand_rejects_write_mask_of_other_length() {
        let vars = table();
        let short = AccessSet::uneven(vec![false; 6], vec![true; 5]);
        assert!(matches!(
            vars.expand(&short),
            Err(SchedulerError::AccessLength { expected: 6, reads: 6, writes: 5 })
        ));
        let long = AccessSet::uneven(vec![false; 6], vec![true; 7]);
        assert!(matches!(
            vars.expand(&long),
            Err(SchedulerError::AccessLength { expected: 6, reads: 6, writes: 7 })
        ));
    }

    #[test]
    fn rejects_bad_names() {
        assert!(matches!(
            VarTable::new(["a", "a"]),
            Err(SchedulerError::DuplicateVariable(_))
        ));
        assert!(matches!(
            VarTable::new(["a..b"]),
            Err(SchedulerError::InvalidVariableName(_))
        ));
        assert!(matches!(
            table().access_set(&["nope"], &[]),
            Err(SchedulerError::UnknownVariable(_))
        ));
    }

    #[test]
    fn flat_table_is_independent() {
        let vars = VarTable::flat(3);
        assert_eq!(vars.len(), 3);
        assert_eq!(vars.index_of("2"), Some(2));
        assert_eq!(vars.closure(1), &[1]);
    }
}
