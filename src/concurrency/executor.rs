//! All-or-nothing execution of one concurrent set.
//!
//! An attempt walks `Pending -> Validating -> (Aborted | Snapshotting ->
//! Executing -> (Committed | RolledBack))`. Validation failures abort before
//! anything is copied; a failing `fire` during execution restores the full
//! marking and the timing state of every behavior in the set.
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::behavior::{Behavior, Behaviors, Clock, FireError, FireRecord};
use crate::concurrency::maximal::ConcurrentSet;
use crate::net::{Marking, Net, TransitionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExecutionState {
    Pending,
    Validating,
    Aborted,
    Snapshotting,
    Executing,
    Committed,
    RolledBack,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Aborted | ExecutionState::Committed | ExecutionState::RolledBack
        )
    }

    fn can_advance_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (Pending, Validating)
                | (Validating, Aborted)
                | (Validating, Snapshotting)
                | (Snapshotting, Executing)
                | (Executing, Committed)
                | (Executing, RolledBack)
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionState::Pending => "PENDING",
            ExecutionState::Validating => "VALIDATING",
            ExecutionState::Aborted => "ABORTED",
            ExecutionState::Snapshotting => "SNAPSHOTTING",
            ExecutionState::Executing => "EXECUTING",
            ExecutionState::Committed => "COMMITTED",
            ExecutionState::RolledBack => "ROLLED_BACK",
        })
    }
}

/// The transition that stopped an attempt and why.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub transition: TransitionId,
    pub error: FireError,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub state: ExecutionState,
    /// States visited, `Pending` first.
    pub history: Vec<ExecutionState>,
    /// Firing records in commit order; empty unless committed.
    pub fired: Vec<FireRecord>,
    pub failure: Option<StepFailure>,
}

impl StepOutcome {
    pub fn is_committed(&self) -> bool {
        self.state == ExecutionState::Committed
    }
}

struct Attempt {
    state: ExecutionState,
    history: Vec<ExecutionState>,
}

impl Attempt {
    fn new() -> Self {
        Self {
            state: ExecutionState::Pending,
            history: vec![ExecutionState::Pending],
        }
    }

    fn advance(&mut self, next: ExecutionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        log::trace!("atomic step: {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    fn finish(self, fired: Vec<FireRecord>, failure: Option<StepFailure>) -> StepOutcome {
        StepOutcome {
            state: self.state,
            history: self.history,
            fired,
            failure,
        }
    }
}

/// Executes concurrent sets against a marking.
pub struct AtomicStepExecutor<'a> {
    net: &'a Net,
}

impl<'a> AtomicStepExecutor<'a> {
    pub fn new(net: &'a Net) -> Self {
        Self { net }
    }

    /// Validate, snapshot, commit. On `RolledBack` and `Aborted` the marking
    /// and the behaviors of `set` are exactly as they were before the call.
    pub fn execute(
        &self,
        set: &[TransitionId],
        behaviors: &mut Behaviors,
        marking: &mut Marking,
        clock: Clock,
    ) -> StepOutcome {
        let mut attempt = Attempt::new();
        let mut order: ConcurrentSet = set.to_vec();
        self.net.sort_by_firing_order(&mut order);

        attempt.advance(ExecutionState::Validating);
        for &transition in &order {
            let enablement = behaviors[transition].can_fire(self.net, marking, clock);
            if !enablement.enabled {
                log::debug!(
                    "aborting step: {} no longer enabled ({})",
                    self.net.transition(transition).name,
                    enablement.reason
                );
                attempt.advance(ExecutionState::Aborted);
                let failure = StepFailure {
                    transition,
                    error: FireError::NotEnabled {
                        transition: self.net.transition(transition).name.clone(),
                        reason: enablement.reason,
                    },
                };
                return attempt.finish(Vec::new(), Some(failure));
            }
        }

        attempt.advance(ExecutionState::Snapshotting);
        let marking_snapshot = marking.clone();
        let behavior_snapshot: Vec<(TransitionId, Box<dyn Behavior>)> = order
            .iter()
            .map(|&t| (t, behaviors[t].clone()))
            .collect();

        attempt.advance(ExecutionState::Executing);
        let mut fired = Vec::with_capacity(order.len());
        for &transition in &order {
            match behaviors[transition].fire(self.net, marking, clock) {
                Ok(record) => fired.push(record),
                Err(error) => {
                    log::warn!(
                        "rolling back step at t={}: {}",
                        clock.time,
                        error
                    );
                    marking.restore_from(&marking_snapshot);
                    for (t, behavior) in behavior_snapshot {
                        behaviors[t] = behavior;
                    }
                    attempt.advance(ExecutionState::RolledBack);
                    return attempt.finish(Vec::new(), Some(StepFailure { transition, error }));
                }
            }
        }

        attempt.advance(ExecutionState::Committed);
        attempt.finish(fired, None)
    }
}

/// How to pick one of several candidate sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    /// Most transitions.
    #[default]
    Largest,
    /// Highest summed priority.
    Priority,
    /// First candidate.
    First,
    /// Uniformly random candidate.
    Random,
}

impl SelectionStrategy {
    /// Index of the chosen set, `None` when `sets` is empty. Ties go to the
    /// earliest set.
    pub fn select<R: Rng>(
        self,
        sets: &[ConcurrentSet],
        net: &Net,
        rng: &mut R,
    ) -> Option<usize> {
        if sets.is_empty() {
            return None;
        }
        let best_by = |score: &dyn Fn(&ConcurrentSet) -> i64| {
            let mut best = 0;
            for (i, set) in sets.iter().enumerate().skip(1) {
                if score(set) > score(&sets[best]) {
                    best = i;
                }
            }
            best
        };
        Some(match self {
            SelectionStrategy::Largest => best_by(&|set| set.len() as i64),
            SelectionStrategy::Priority => best_by(&|set| {
                set.iter()
                    .map(|&t| i64::from(net.transition(t).priority))
                    .sum()
            }),
            SelectionStrategy::First => 0,
            SelectionStrategy::Random => rng.random_range(0..sets.len()),
        })
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SelectionStrategy::Largest => "largest",
            SelectionStrategy::Priority => "priority",
            SelectionStrategy::First => "first",
            SelectionStrategy::Random => "random",
        })
    }
}

impl FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "largest" => Ok(SelectionStrategy::Largest),
            "priority" => Ok(SelectionStrategy::Priority),
            "first" => Ok(SelectionStrategy::First),
            "random" => Ok(SelectionStrategy::Random),
            other => Err(format!(
                "unknown strategy `{other}` (expected largest, priority, first or random)"
            )),
        }
    }
}
