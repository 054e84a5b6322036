//! Transition behaviors: one strategy object per transition.
//!
//! A [`Behavior`] decides whether its transition may fire under a marking and
//! performs the firing. Timing state (enablement clocks, sampled delays) is
//! owned by the behavior; the simulation clock is passed in through
//! [`Clock`] on every call.
use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;

use crate::net::{
    IndexVec, Marking, Net, PlaceId, TransitionId, TransitionKind, TransitionKindTag, Weight,
};

pub mod arcs;
mod continuous;
mod immediate;
mod stochastic;
mod timed;

pub use continuous::ContinuousBehavior;
pub use immediate::ImmediateBehavior;
pub use stochastic::StochasticBehavior;
pub use timed::{TimedBehavior, TimedPath};

/// Simulation time at the call, and the integration step for continuous flow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clock {
    pub time: f64,
    pub dt: f64,
}

impl Clock {
    pub fn at(time: f64) -> Self {
        Self { time, dt: 0.0 }
    }

    pub fn new(time: f64, dt: f64) -> Self {
        Self { time, dt }
    }
}

/// Answer of [`Behavior::can_fire`], with a human-readable reason either way.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Enablement {
    pub enabled: bool,
    pub reason: String,
}

impl Enablement {
    pub fn enabled(reason: impl Into<String>) -> Self {
        Self {
            enabled: true,
            reason: reason.into(),
        }
    }

    pub fn disabled(reason: impl Into<String>) -> Self {
        Self {
            enabled: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FireError {
    #[error("transition `{transition}` fired while disabled: {reason}")]
    NotEnabled { transition: String, reason: String },
    #[error(
        "transition `{transition}` needs {required} from `{place}` but only {available} available"
    )]
    Shortfall {
        transition: String,
        place: String,
        required: Weight,
        available: Weight,
    },
    #[error("transition `{transition}` would raise `{place}` to {after} above capacity {capacity}")]
    CapacityExceeded {
        transition: String,
        place: String,
        after: Weight,
        capacity: Weight,
    },
}

/// Token movement of one successful firing.
#[derive(Debug, Clone, PartialEq)]
pub struct FireRecord {
    pub transition: TransitionId,
    pub consumed: IndexMap<PlaceId, Weight>,
    pub produced: IndexMap<PlaceId, Weight>,
}

impl FireRecord {
    /// True when the firing neither consumed nor produced anything, e.g. a
    /// continuous flow cut to zero by capacity.
    pub fn moved_nothing(&self) -> bool {
        self.consumed.is_empty() && self.produced.is_empty()
    }
}

pub trait Behavior: fmt::Debug {
    fn transition(&self) -> TransitionId;

    fn kind(&self) -> TransitionKindTag;

    /// Read-only enablement check.
    fn can_fire(&self, net: &Net, marking: &Marking, clock: Clock) -> Enablement;

    /// Fires once. On `Err` the marking has not been modified.
    fn fire(
        &mut self,
        net: &Net,
        marking: &mut Marking,
        clock: Clock,
    ) -> Result<FireRecord, FireError>;

    /// Tracks structural enablement over time. Called by the controller
    /// whenever the marking or the clock changed.
    fn update_enablement(&mut self, _net: &Net, _marking: &Marking, _clock: Clock) {}

    /// Drops all timing state.
    fn reset(&mut self) {}

    fn clone_box(&self) -> Box<dyn Behavior>;
}

impl Clone for Box<dyn Behavior> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

pub type Behaviors = IndexVec<TransitionId, Box<dyn Behavior>>;

/// Creates the behavior matching the kind of `transition`.
pub fn behavior_for(net: &Net, transition: TransitionId, seed: u64) -> Box<dyn Behavior> {
    match &net.transition(transition).kind {
        TransitionKind::Immediate => Box::new(ImmediateBehavior::new(transition)),
        TransitionKind::Timed { earliest, latest } => {
            Box::new(TimedBehavior::new(transition, *earliest, *latest))
        }
        TransitionKind::Stochastic { rate, burst } => Box::new(StochasticBehavior::new(
            transition,
            *rate,
            *burst,
            derive_seed(seed, transition),
        )),
        TransitionKind::Continuous {
            rate,
            min_rate,
            max_rate,
        } => Box::new(ContinuousBehavior::new(
            transition,
            rate.clone(),
            *min_rate,
            *max_rate,
        )),
    }
}

/// One behavior per transition, indexed by transition id.
pub fn behaviors_for(net: &Net, seed: u64) -> Behaviors {
    IndexVec::from_fn(net.transitions_len(), |transition| {
        behavior_for(net, transition, seed)
    })
}

fn derive_seed(seed: u64, transition: TransitionId) -> u64 {
    seed ^ (u64::from(transition.raw()) + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Shared firing path for the discrete kinds: re-check, build the plan with
/// `multiplier`, apply it.
pub(crate) fn fire_discrete(
    behavior: &dyn Behavior,
    net: &Net,
    marking: &mut Marking,
    clock: Clock,
    multiplier: f64,
) -> Result<FireRecord, FireError> {
    let transition = behavior.transition();
    let enablement = behavior.can_fire(net, marking, clock);
    if !enablement.enabled {
        log::error!(
            "fire called on disabled transition {}: {}",
            net.transition(transition).name,
            enablement.reason
        );
        return Err(FireError::NotEnabled {
            transition: net.transition(transition).name.clone(),
            reason: enablement.reason,
        });
    }

    let plan = arcs::TransferPlan::build(net, transition, multiplier);
    plan.apply(net, transition, marking)?;
    Ok(FireRecord {
        transition,
        consumed: plan.consumed,
        produced: plan.produced,
    })
}
