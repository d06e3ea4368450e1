//! Non-deterministic choices
//!
//! A step has at most one choice point: where (and whether) an allocation is
//! placed, or the result of a pointer comparison that provenance does not
//! decide. The interpreter asks a [`ChoiceOracle`] instead of picking, so one
//! semantics serves reproducible runs, exhaustive exploration and twin runs.

use crate::ir::ICmpPred;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A point where several successors are legal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChoicePoint {
    /// `malloc` of `size` bytes: fail with null or place at a candidate
    Malloc {
        /// Requested size in bytes
        size: u64,
        /// Proposed base addresses
        candidates: Vec<u64>,
    },
    /// `alloca` of `size` bytes: place at a candidate
    Alloca {
        /// Requested size in bytes
        size: u64,
        /// Proposed base addresses
        candidates: Vec<u64>,
    },
    /// Pointer comparison whose result depends on concrete addresses
    PointerCompare {
        /// Predicate being evaluated
        pred: ICmpPred,
    },
}

/// An answer to a [`ChoicePoint`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Choice {
    /// Allocation returns null
    Null,
    /// Allocation placed at the candidate with this index
    /// (out of memory when there is none)
    Place(usize),
    /// Comparison result
    Compare(bool),
}

impl ChoicePoint {
    /// Every legal answer, in a fixed order
    pub fn options(&self) -> Vec<Choice> {
        match self {
            ChoicePoint::Malloc { candidates, .. } => std::iter::once(Choice::Null)
                .chain(placements(candidates))
                .collect(),
            ChoicePoint::Alloca { candidates, .. } => placements(candidates).collect(),
            ChoicePoint::PointerCompare { .. } => vec![Choice::Compare(true), Choice::Compare(false)],
        }
    }

    /// Returns true if `choice` is one of [`ChoicePoint::options`]
    pub fn admits(&self, choice: &Choice) -> bool {
        match (self, choice) {
            (ChoicePoint::Malloc { .. }, Choice::Null) => true,
            (ChoicePoint::Malloc { candidates, .. }, Choice::Place(i))
            | (ChoicePoint::Alloca { candidates, .. }, Choice::Place(i)) => {
                *i < candidates.len().max(1)
            }
            (ChoicePoint::PointerCompare { .. }, Choice::Compare(_)) => true,
            _ => false,
        }
    }
}

/// With no candidates, a single placement stands for running out of memory
fn placements(candidates: &[u64]) -> impl Iterator<Item = Choice> {
    (0..candidates.len().max(1)).map(Choice::Place)
}

/// Source of answers at choice points
pub trait ChoiceOracle {
    /// Answers one choice point
    fn choose(&mut self, point: &ChoicePoint) -> Choice;
}

impl<O: ChoiceOracle + ?Sized> ChoiceOracle for &mut O {
    fn choose(&mut self, point: &ChoicePoint) -> Choice {
        (**self).choose(point)
    }
}

/// Deterministic oracle: allocations succeed at the first candidate and
/// ambiguous comparisons are false
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstFit;

impl ChoiceOracle for FirstFit {
    fn choose(&mut self, point: &ChoicePoint) -> Choice {
        match point {
            ChoicePoint::Malloc { .. } | ChoicePoint::Alloca { .. } => Choice::Place(0),
            ChoicePoint::PointerCompare { .. } => Choice::Compare(false),
        }
    }
}

/// Replays a fixed sequence of choices, then defers to [`FirstFit`]
#[derive(Debug, Clone, Default)]
pub struct Scripted {
    script: VecDeque<Choice>,
}

impl Scripted {
    /// Oracle answering with `choices` in order
    pub fn new(choices: impl IntoIterator<Item = Choice>) -> Self {
        Self {
            script: choices.into_iter().collect(),
        }
    }

    /// Choices not consumed yet
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl ChoiceOracle for Scripted {
    fn choose(&mut self, point: &ChoicePoint) -> Choice {
        self.script
            .pop_front()
            .unwrap_or_else(|| FirstFit.choose(point))
    }
}

/// Wraps another oracle and logs every question and answer
#[derive(Debug, Clone, Default)]
pub struct Recording<O> {
    inner: O,
    log: Vec<(ChoicePoint, Choice)>,
}

impl<O: ChoiceOracle> Recording<O> {
    /// Records the answers given by `inner`
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            log: Vec::new(),
        }
    }

    /// Questions and answers so far
    pub fn log(&self) -> &[(ChoicePoint, Choice)] {
        &self.log
    }

    /// The answers alone, suitable for [`Scripted::new`]
    pub fn choices(&self) -> Vec<Choice> {
        self.log.iter().map(|(_, c)| *c).collect()
    }
}

impl<O: ChoiceOracle> ChoiceOracle for Recording<O> {
    fn choose(&mut self, point: &ChoicePoint) -> Choice {
        let choice = self.inner.choose(point);
        self.log.push((point.clone(), choice));
        choice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malloc_options() {
        let point = ChoicePoint::Malloc {
            size: 4,
            candidates: vec![8, 16],
        };
        assert_eq!(
            point.options(),
            vec![Choice::Null, Choice::Place(0), Choice::Place(1)]
        );
        assert!(point.admits(&Choice::Place(1)));
        assert!(!point.admits(&Choice::Place(2)));
        assert!(!point.admits(&Choice::Compare(true)));
    }

    #[test]
    fn test_exhausted_memory_still_offers_placement() {
        let point = ChoicePoint::Alloca {
            size: 4,
            candidates: vec![],
        };
        assert_eq!(point.options(), vec![Choice::Place(0)]);
        assert!(!point.admits(&Choice::Null));
    }

    #[test]
    fn test_scripted_then_first_fit() {
        let cmp = ChoicePoint::PointerCompare { pred: ICmpPred::Eq };
        let mut oracle = Scripted::new([Choice::Compare(true)]);
        assert_eq!(oracle.choose(&cmp), Choice::Compare(true));
        assert_eq!(oracle.remaining(), 0);
        assert_eq!(oracle.choose(&cmp), Choice::Compare(false));
    }

    #[test]
    fn test_recording() {
        let mut oracle = Recording::new(FirstFit);
        let point = ChoicePoint::Malloc {
            size: 1,
            candidates: vec![8],
        };
        oracle.choose(&point);
        assert_eq!(oracle.log().len(), 1);
        assert_eq!(oracle.choices(), vec![Choice::Place(0)]);
    }
}
