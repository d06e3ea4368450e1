//! Multi-step execution: traces, outcomes and exhaustive exploration

use super::oracle::ChoiceOracle;
use super::state::Config;
use super::step::{step, successors, Event, StepResult};
use crate::error::{StuckReason, UndefinedBehavior};
use crate::ir::ModuleTable;
use crate::value::Value;

/// How an execution ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The entry function returned
    Finished(Value),
    /// Undefined behavior
    GoesWrong(UndefinedBehavior),
    /// An allocation could not be placed
    OutOfMemory,
    /// The configuration is ill-formed
    Stuck(StuckReason),
    /// The step budget ran out
    Timeout,
    /// Stopped after the requested number of steps
    Running(Box<Config>),
}

impl Outcome {
    /// Returns true for every outcome except [`Outcome::Running`] and [`Outcome::Timeout`]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Running(_) | Outcome::Timeout)
    }

    /// Returns true for undefined behavior
    pub fn goes_wrong(&self) -> bool {
        matches!(self, Outcome::GoesWrong(_))
    }

    /// Short name of the outcome kind
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Finished(_) => "finished",
            Outcome::GoesWrong(_) => "goes-wrong",
            Outcome::OutOfMemory => "out-of-memory",
            Outcome::Stuck(_) => "stuck",
            Outcome::Timeout => "timeout",
            Outcome::Running(_) => "running",
        }
    }
}

/// Observable events of an execution and how it ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    /// Observable events, silent ones filtered out
    pub events: Vec<Event>,
    /// Terminal outcome or the state reached
    pub outcome: Outcome,
    /// Steps taken
    pub steps: usize,
}

/// Successor of a step, or the terminal outcome it produced
enum Advance {
    Next(Event, Box<Config>),
    Done(Outcome),
}

fn advance(result: StepResult) -> Advance {
    match result {
        StepResult::Success(event, next) => Advance::Next(event, next),
        StepResult::OutOfMemory => Advance::Done(Outcome::OutOfMemory),
        StepResult::GoesWrong(ub) => Advance::Done(Outcome::GoesWrong(ub)),
        StepResult::Finished(v) => Advance::Done(Outcome::Finished(v)),
        StepResult::Stuck(reason) => Advance::Done(Outcome::Stuck(reason)),
    }
}

/// Runs at most `n` steps along the path the oracle picks.
///
/// Stops early on a terminal outcome; otherwise the outcome is
/// [`Outcome::Running`] with the state reached.
pub fn nstep<M: ModuleTable + ?Sized>(
    module: &M,
    config: &Config,
    n: usize,
    oracle: &mut dyn ChoiceOracle,
) -> Trace {
    let mut events = Vec::new();
    let mut current = Box::new(config.clone());
    for steps in 0..n {
        match advance(step(module, &current, oracle)) {
            Advance::Next(event, next) => {
                if event.is_observable() {
                    events.push(event);
                }
                current = next;
            }
            Advance::Done(outcome) => {
                return Trace {
                    events,
                    outcome,
                    steps: steps + 1,
                }
            }
        }
    }
    Trace {
        events,
        outcome: Outcome::Running(current),
        steps: n,
    }
}

/// Runs to completion, reporting [`Outcome::Timeout`] after `budget` steps
pub fn run<M: ModuleTable + ?Sized>(
    module: &M,
    config: &Config,
    oracle: &mut dyn ChoiceOracle,
    budget: usize,
) -> Trace {
    let mut trace = nstep(module, config, budget, oracle);
    if let Outcome::Running(_) = trace.outcome {
        tracing::debug!("step budget of {} exhausted", budget);
        trace.outcome = Outcome::Timeout;
    }
    trace
}

/// Every trace of at most `n` steps, over all choices.
///
/// Enumeration stops once `limit` traces have been produced; the second
/// element reports whether that happened.
pub fn nstep_all<M: ModuleTable + ?Sized>(
    module: &M,
    config: &Config,
    n: usize,
    limit: usize,
) -> (Vec<Trace>, bool) {
    let mut done = Vec::new();
    let mut frontier = vec![(Vec::new(), Box::new(config.clone()), 0usize)];

    while let Some((events, current, steps)) = frontier.pop() {
        if done.len() >= limit {
            tracing::debug!("exploration capped at {} traces", limit);
            return (done, true);
        }
        if steps == n {
            done.push(Trace {
                events,
                outcome: Outcome::Running(current),
                steps,
            });
            continue;
        }
        for result in successors(module, &current).into_iter().rev() {
            match advance(result) {
                Advance::Next(event, next) => {
                    let mut events = events.clone();
                    if event.is_observable() {
                        events.push(event);
                    }
                    frontier.push((events, next, steps + 1));
                }
                Advance::Done(outcome) => done.push(Trace {
                    events: events.clone(),
                    outcome,
                    steps: steps + 1,
                }),
            }
        }
    }
    (done, false)
}

/// Every complete execution within `budget` steps, over all choices
pub fn explore<M: ModuleTable + ?Sized>(
    module: &M,
    config: &Config,
    budget: usize,
    limit: usize,
) -> (Vec<Trace>, bool) {
    let (mut traces, capped) = nstep_all(module, config, budget, limit);
    for trace in &mut traces {
        if let Outcome::Running(_) = trace.outcome {
            trace.outcome = Outcome::Timeout;
        }
    }
    (traces, capped)
}

/// Trace equivalence.
///
/// Undefined behavior is absorbing: two traces that both go wrong are
/// equivalent whatever their events. Otherwise the events must match and the
/// outcomes must agree; running states are compared without program
/// counters or clock ticks.
pub fn nstep_eq(a: &Trace, b: &Trace) -> bool {
    if a.outcome.goes_wrong() && b.outcome.goes_wrong() {
        return true;
    }
    a.events == b.events && outcomes_eq(&a.outcome, &b.outcome)
}

fn outcomes_eq(a: &Outcome, b: &Outcome) -> bool {
    match (a, b) {
        (Outcome::Running(x), Outcome::Running(y)) => x.eq_wopc(y),
        (Outcome::Finished(x), Outcome::Finished(y)) => x == y,
        (Outcome::Stuck(x), Outcome::Stuck(y)) => x == y,
        (Outcome::GoesWrong(_), Outcome::GoesWrong(_))
        | (Outcome::OutOfMemory, Outcome::OutOfMemory)
        | (Outcome::Timeout, Outcome::Timeout) => true,
        _ => false,
    }
}

/// `target` refines `source`: it is matched by some source trace, or some
/// source trace goes wrong after a prefix of its events
pub fn refines(target: &Trace, sources: &[Trace]) -> bool {
    sources.iter().any(|s| {
        nstep_eq(target, s) || (s.outcome.goes_wrong() && target.events.starts_with(&s.events))
    })
}
