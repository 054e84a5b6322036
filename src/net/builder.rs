//! Programmatic construction of a [`Net`] from string identities.
//!
//! Every loading path (programmatic, JSON, RON) ends in [`NetBuilder::build`],
//! which is where structural inconsistencies are reported.
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::core::Net;
use crate::net::expr::{ExprError, Expression};
use crate::net::ids::{PlaceId, TransitionId};
use crate::net::index_vec::{Idx, IndexVec};
use crate::net::structure::{
    Arc, ArcDirection, ArcKind, Place, Transition, TransitionKind, Weight,
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("duplicate place id `{0}`")]
    DuplicatePlace(String),
    #[error("duplicate transition id `{0}`")]
    DuplicateTransition(String),
    #[error("arc references unknown place `{0}`")]
    UnknownPlace(String),
    #[error("arc references unknown transition `{0}`")]
    UnknownTransition(String),
    #[error("arc {place} <-> {transition} has invalid weight {weight}")]
    InvalidWeight {
        place: String,
        transition: String,
        weight: Weight,
    },
    #[error("place `{place}` has invalid marking {tokens} (capacity {capacity:?})")]
    InvalidMarking {
        place: String,
        tokens: Weight,
        capacity: Option<Weight>,
    },
    #[error("transition `{transition}`: {reason}")]
    InvalidParameters { transition: String, reason: String },
    #[error(transparent)]
    Expression(#[from] ExprError),
}

/// String-keyed arc description as produced by import collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcSpec {
    pub place: String,
    pub transition: String,
    pub direction: ArcDirection,
    #[serde(default = "default_weight")]
    pub weight: Weight,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Expression>,
    #[serde(default)]
    pub kind: ArcKind,
}

fn default_weight() -> Weight {
    1.0
}

impl ArcSpec {
    pub fn input(place: impl Into<String>, transition: impl Into<String>, weight: Weight) -> Self {
        Self {
            place: place.into(),
            transition: transition.into(),
            direction: ArcDirection::PlaceToTransition,
            weight,
            threshold: None,
            kind: ArcKind::Normal,
        }
    }

    pub fn output(transition: impl Into<String>, place: impl Into<String>, weight: Weight) -> Self {
        Self {
            direction: ArcDirection::TransitionToPlace,
            ..Self::input(place, transition, weight)
        }
    }

    pub fn with_kind(mut self, kind: ArcKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_threshold(mut self, threshold: Expression) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

#[derive(Debug, Default, Clone)]
pub struct NetBuilder {
    places: Vec<Place>,
    transitions: Vec<Transition>,
    arcs: Vec<ArcSpec>,
}

impl NetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(&mut self, name: impl Into<String>, initial_marking: Weight) -> &mut Self {
        self.add_place(Place::new(name, initial_marking))
    }

    pub fn add_place(&mut self, place: Place) -> &mut Self {
        self.places.push(place);
        self
    }

    pub fn transition(&mut self, transition: Transition) -> &mut Self {
        self.transitions.push(transition);
        self
    }

    pub fn arc(&mut self, arc: ArcSpec) -> &mut Self {
        self.arcs.push(arc);
        self
    }

    pub fn input(
        &mut self,
        place: impl Into<String>,
        transition: impl Into<String>,
        weight: Weight,
    ) -> &mut Self {
        self.arc(ArcSpec::input(place, transition, weight))
    }

    pub fn output(
        &mut self,
        transition: impl Into<String>,
        place: impl Into<String>,
        weight: Weight,
    ) -> &mut Self {
        self.arc(ArcSpec::output(transition, place, weight))
    }

    pub fn inhibitor(
        &mut self,
        place: impl Into<String>,
        transition: impl Into<String>,
        weight: Weight,
    ) -> &mut Self {
        self.arc(ArcSpec::input(place, transition, weight).with_kind(ArcKind::Inhibitor))
    }

    pub fn test_arc(
        &mut self,
        place: impl Into<String>,
        transition: impl Into<String>,
        weight: Weight,
    ) -> &mut Self {
        self.arc(ArcSpec::input(place, transition, weight).with_kind(ArcKind::Test))
    }

    pub(crate) fn into_parts(self) -> (Vec<Place>, Vec<Transition>, Vec<ArcSpec>) {
        (self.places, self.transitions, self.arcs)
    }

    pub(crate) fn from_parts(
        places: Vec<Place>,
        transitions: Vec<Transition>,
        arcs: Vec<ArcSpec>,
    ) -> Self {
        Self {
            places,
            transitions,
            arcs,
        }
    }

    pub fn build(&self) -> Result<Net, ModelError> {
        let mut seen = HashSet::new();
        for place in &self.places {
            if !seen.insert(place.name.as_str()) {
                return Err(ModelError::DuplicatePlace(place.name.clone()));
            }
            validate_place(place)?;
        }
        let mut seen = HashSet::new();
        for transition in &self.transitions {
            if !seen.insert(transition.name.as_str()) {
                return Err(ModelError::DuplicateTransition(transition.name.clone()));
            }
            validate_transition(transition)?;
        }

        let places: IndexVec<PlaceId, Place> = self.places.iter().cloned().collect();
        let lookup = |name: &str| {
            self.places
                .iter()
                .position(|place| place.name == name)
                .map(PlaceId::from_usize)
        };
        let transition_lookup = |name: &str| {
            self.transitions
                .iter()
                .position(|transition| transition.name == name)
                .map(TransitionId::from_usize)
        };

        let mut transitions: IndexVec<TransitionId, Transition> =
            IndexVec::with_capacity(self.transitions.len());
        for transition in &self.transitions {
            let mut transition = transition.clone();
            if let Some(guard) = transition.guard.as_mut() {
                guard.resolve(lookup)?;
            }
            if let TransitionKind::Continuous { rate, .. } = &mut transition.kind {
                rate.resolve(lookup)?;
            }
            transitions.push(transition);
        }

        let mut arcs = Vec::with_capacity(self.arcs.len());
        for spec in &self.arcs {
            let place =
                lookup(&spec.place).ok_or_else(|| ModelError::UnknownPlace(spec.place.clone()))?;
            let transition = transition_lookup(&spec.transition)
                .ok_or_else(|| ModelError::UnknownTransition(spec.transition.clone()))?;
            if !(spec.weight.is_finite() && spec.weight > 0.0) {
                return Err(ModelError::InvalidWeight {
                    place: spec.place.clone(),
                    transition: spec.transition.clone(),
                    weight: spec.weight,
                });
            }
            let mut threshold = spec.threshold.clone();
            if let Some(threshold) = threshold.as_mut() {
                threshold.resolve(lookup)?;
            }
            arcs.push(Arc {
                place,
                transition,
                direction: spec.direction,
                weight: spec.weight,
                threshold,
                kind: spec.kind,
            });
        }

        let net = Net::from_parts(places, transitions, arcs);
        log::debug!(
            "built net with {} places, {} transitions, {} arcs",
            net.places_len(),
            net.transitions_len(),
            net.arcs().len()
        );
        Ok(net)
    }
}

fn validate_place(place: &Place) -> Result<(), ModelError> {
    let tokens = place.initial_marking;
    let within_capacity = match place.capacity {
        Some(capacity) => capacity >= 0.0 && tokens <= capacity,
        None => true,
    };
    if !(tokens.is_finite() && tokens >= 0.0 && within_capacity) {
        return Err(ModelError::InvalidMarking {
            place: place.name.clone(),
            tokens,
            capacity: place.capacity,
        });
    }
    Ok(())
}

fn validate_transition(transition: &Transition) -> Result<(), ModelError> {
    let invalid = |reason: String| ModelError::InvalidParameters {
        transition: transition.name.clone(),
        reason,
    };
    match &transition.kind {
        TransitionKind::Immediate => {}
        TransitionKind::Timed { earliest, latest } => {
            if !(*earliest >= 0.0 && earliest <= latest) {
                return Err(invalid(format!(
                    "timing window [{earliest}, {latest}] is empty or negative"
                )));
            }
        }
        TransitionKind::Stochastic { rate, burst } => {
            if !(rate.is_finite() && *rate > 0.0) {
                return Err(invalid(format!("rate {rate} must be positive")));
            }
            if !(burst.is_finite() && *burst > 0.0) {
                return Err(invalid(format!("burst {burst} must be positive")));
            }
        }
        TransitionKind::Continuous {
            min_rate, max_rate, ..
        } => {
            if let (Some(min), Some(max)) = (min_rate, max_rate) {
                if min > max {
                    return Err(invalid(format!("rate bounds [{min}, {max}] are inverted")));
                }
            }
        }
    }
    Ok(())
}
