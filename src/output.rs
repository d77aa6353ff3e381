use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::ir::Method;

/// One outgoing branch of one instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstructionBranch {
    pub instruction: usize,
    pub branch: u32,
}

impl InstructionBranch {
    pub fn new(instruction: usize, branch: u32) -> Self {
        Self {
            instruction,
            branch,
        }
    }
}

/// Write side of a filter invocation.
pub trait FilterOutput {
    /// Excludes the closed position range `[from, to]` from coverage.
    fn ignore(&mut self, from: usize, to: usize);

    /// Counts the executions of two instructions as one.
    fn merge(&mut self, first: usize, second: usize);

    /// Replaces the literal branches of `source` with equivalence groups.
    fn replace_branches(&mut self, source: usize, groups: Vec<Vec<InstructionBranch>>);
}

/// Branch groups accumulated per target, in first-seen target order.
#[derive(Debug, Default)]
pub struct Replacements {
    groups: Vec<(usize, Vec<InstructionBranch>)>,
}

impl Replacements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `(instruction, branch)` to the group of `target`.
    pub fn add(&mut self, target: usize, instruction: usize, branch: u32) {
        let entry = InstructionBranch::new(instruction, branch);
        match self.groups.iter_mut().find(|(key, _)| *key == target) {
            Some((_, group)) => group.push(entry),
            None => self.groups.push((target, vec![entry])),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn into_groups(self) -> Vec<Vec<InstructionBranch>> {
        self.groups.into_iter().map(|(_, group)| group).collect()
    }

    /// Groups for a switch whose default target is dropped: one group per
    /// distinct non-default target instruction.
    pub fn ignore_default_branch(method: &Method, switch: usize) -> Vec<Vec<InstructionBranch>> {
        let mut replacements = Replacements::new();
        for (branch, target) in method.branches(switch) {
            if branch != 0 {
                let target = method.skip_non_opcodes(target).unwrap_or(target);
                replacements.add(target, switch, branch);
            }
        }
        replacements.into_groups()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct IgnoredRange {
    pub from: usize,
    pub to: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct MergedPair {
    pub first: usize,
    pub second: usize,
}

/// Recording sink handed to the downstream coverage consumer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MethodReport {
    pub ignored: Vec<IgnoredRange>,
    pub merged: Vec<MergedPair>,
    pub replacements: BTreeMap<usize, Vec<Vec<InstructionBranch>>>,
}

impl MethodReport {
    pub fn is_empty(&self) -> bool {
        self.ignored.is_empty() && self.merged.is_empty() && self.replacements.is_empty()
    }

    /// Every position covered by at least one ignored range.
    pub fn ignored_positions(&self) -> BTreeSet<usize> {
        self.ignored
            .iter()
            .flat_map(|range| range.from..=range.to)
            .collect()
    }

    /// Ranges sorted with overlapping and adjacent ones joined.
    pub fn coalesced_ranges(&self) -> Vec<IgnoredRange> {
        let mut sorted = self.ignored.clone();
        sorted.sort();
        let mut coalesced: Vec<IgnoredRange> = Vec::new();
        for range in sorted {
            match coalesced.last_mut() {
                Some(last) if range.from <= last.to + 1 => last.to = last.to.max(range.to),
                _ => coalesced.push(range),
            }
        }
        coalesced
    }
}

impl FilterOutput for MethodReport {
    fn ignore(&mut self, from: usize, to: usize) {
        debug_assert!(from <= to, "ignored range starts after it ends: {from} > {to}");
        self.ignored.push(IgnoredRange { from, to });
    }

    fn merge(&mut self, first: usize, second: usize) {
        self.merged.push(MergedPair { first, second });
    }

    fn replace_branches(&mut self, source: usize, groups: Vec<Vec<InstructionBranch>>) {
        debug_assert!(
            groups.iter().all(|group| !group.is_empty()),
            "empty replacement group for instruction {source}"
        );
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                groups.iter().flatten().all(|entry| seen.insert(*entry))
            },
            "branch assigned to more than one replacement group for instruction {source}"
        );
        self.replacements.insert(source, groups);
    }
}
