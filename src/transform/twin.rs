//! Twin execution
//!
//! Runs two copies of a program in lock-step, identical except for where
//! the allocator places each block: every block reserves the same twin set
//! in both runs and each run takes its base from its own [`AddressPolicy`].
//! A program whose behavior does not depend on concrete addresses produces
//! the same trace in both runs.

use crate::ir::ModuleTable;
use crate::runtime::{
    step, Choice, ChoiceOracle, ChoicePoint, Config, Event, FirstFit, Outcome, StepResult,
};
use serde::{Deserialize, Serialize};

/// Which twin address becomes the base of each block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressPolicy {
    /// The first candidate
    First,
    /// The last candidate
    Last,
    /// The candidate at this index, clamped to the last one
    Index(usize),
}

impl AddressPolicy {
    /// Placement index among `n` candidates
    pub fn pick(self, n: usize) -> usize {
        let last = n.saturating_sub(1);
        match self {
            AddressPolicy::First => 0,
            AddressPolicy::Last => last,
            AddressPolicy::Index(i) => i.min(last),
        }
    }
}

/// Why the twins parted ways
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Divergence {
    /// The runs reached different outcomes
    Outcome {
        /// Outcome of the left run
        left: Outcome,
        /// Outcome of the right run
        right: Outcome,
    },
    /// The runs produced different events
    Events,
    /// The runs faced different choice points
    Choice,
}

/// Result of a twin comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TwinVerdict {
    /// Both runs ended the same way
    Equivalent {
        /// Steps taken by each run
        steps: usize,
    },
    /// The runs differ at this step (1-based)
    DivergesAt {
        /// Step at which the difference showed
        step: usize,
        /// What differed
        cause: Divergence,
    },
    /// The step budget ran out first
    Inconclusive {
        /// Steps taken
        steps: usize,
    },
}

impl TwinVerdict {
    /// Returns true for [`TwinVerdict::Equivalent`]
    pub fn is_equivalent(&self) -> bool {
        matches!(self, TwinVerdict::Equivalent { .. })
    }
}

fn placements(point: &ChoicePoint) -> usize {
    match point {
        ChoicePoint::Malloc { candidates, .. } | ChoicePoint::Alloca { candidates, .. } => {
            candidates.len()
        }
        ChoicePoint::PointerCompare { .. } => 0,
    }
}

/// Left twin: asks the base oracle and overrides placements with its policy
struct Lead<'a> {
    base: &'a mut dyn ChoiceOracle,
    policy: AddressPolicy,
    answered: Option<Choice>,
}

impl ChoiceOracle for Lead<'_> {
    fn choose(&mut self, point: &ChoicePoint) -> Choice {
        let choice = match self.base.choose(point) {
            Choice::Place(_) => Choice::Place(self.policy.pick(placements(point))),
            other => other,
        };
        self.answered = Some(choice);
        choice
    }
}

/// Right twin: repeats the left answer, placing with its own policy
struct Follow {
    lead: Option<Choice>,
    policy: AddressPolicy,
    in_sync: bool,
}

impl ChoiceOracle for Follow {
    fn choose(&mut self, point: &ChoicePoint) -> Choice {
        let answer = match self.lead.take() {
            Some(Choice::Place(_)) => Choice::Place(self.policy.pick(placements(point))),
            Some(choice) => choice,
            None => {
                self.in_sync = false;
                FirstFit.choose(point)
            }
        };
        if !point.admits(&answer) {
            self.in_sync = false;
        }
        answer
    }
}

enum Stepped {
    Next(Box<Config>),
    Done(Outcome),
}

fn split(result: StepResult) -> (Option<Event>, Stepped) {
    match result {
        StepResult::Success(event, next) => (Some(event), Stepped::Next(next)),
        StepResult::OutOfMemory => (None, Stepped::Done(Outcome::OutOfMemory)),
        StepResult::GoesWrong(ub) => (None, Stepped::Done(Outcome::GoesWrong(ub))),
        StepResult::Finished(v) => (None, Stepped::Done(Outcome::Finished(v))),
        StepResult::Stuck(reason) => (None, Stepped::Done(Outcome::Stuck(reason))),
    }
}

fn same_end(left: &Outcome, right: &Outcome) -> bool {
    match (left, right) {
        (Outcome::GoesWrong(_), Outcome::GoesWrong(_)) => true,
        (Outcome::OutOfMemory, Outcome::OutOfMemory) => true,
        (Outcome::Finished(a), Outcome::Finished(b)) => a == b,
        (Outcome::Stuck(a), Outcome::Stuck(b)) => a == b,
        _ => false,
    }
}

/// Runs `left` and `right` in lock-step for at most `budget` steps.
///
/// The base oracle answers the left run's choice points; the right run
/// replays every answer except placement indices, which each side takes
/// from its own policy. Choice points that do not line up count as a
/// divergence.
pub fn compare_configs<M: ModuleTable + ?Sized>(
    module: &M,
    left: &Config,
    right: &Config,
    policies: (AddressPolicy, AddressPolicy),
    base: &mut dyn ChoiceOracle,
    budget: usize,
) -> TwinVerdict {
    let mut left = Box::new(left.clone());
    let mut right = Box::new(right.clone());

    for n in 1..=budget {
        let mut lead = Lead {
            base: &mut *base,
            policy: policies.0,
            answered: None,
        };
        let l = step(module, &left, &mut lead);
        let mut follow = Follow {
            lead: lead.answered,
            policy: policies.1,
            in_sync: true,
        };
        let r = step(module, &right, &mut follow);

        if !follow.in_sync || follow.lead.is_some() {
            tracing::debug!("twins diverge at step {}: choice points differ", n);
            return TwinVerdict::DivergesAt {
                step: n,
                cause: Divergence::Choice,
            };
        }

        match (split(l), split(r)) {
            ((Some(el), Stepped::Next(nl)), (Some(er), Stepped::Next(nr))) => {
                if el != er {
                    return TwinVerdict::DivergesAt {
                        step: n,
                        cause: Divergence::Events,
                    };
                }
                left = nl;
                right = nr;
            }
            ((_, Stepped::Done(a)), (_, Stepped::Done(b))) if same_end(&a, &b) => {
                tracing::debug!("twins agree after {} steps: {}", n, a.kind());
                return TwinVerdict::Equivalent { steps: n };
            }
            ((_, a), (_, b)) => {
                let outcome = |s: Stepped| match s {
                    Stepped::Next(cfg) => Outcome::Running(cfg),
                    Stepped::Done(o) => o,
                };
                let (left, right) = (outcome(a), outcome(b));
                tracing::debug!(
                    "twins diverge at step {}: {} vs {}",
                    n,
                    left.kind(),
                    right.kind()
                );
                return TwinVerdict::DivergesAt {
                    step: n,
                    cause: Divergence::Outcome { left, right },
                };
            }
        }
    }
    TwinVerdict::Inconclusive { steps: budget }
}

/// Twin comparison of one configuration under two address policies
pub fn compare<M: ModuleTable + ?Sized>(
    module: &M,
    config: &Config,
    policies: (AddressPolicy, AddressPolicy),
    base: &mut dyn ChoiceOracle,
    budget: usize,
) -> TwinVerdict {
    compare_configs(module, config, config, policies, base, budget)
}
