//! Static net elements: places, transitions, arcs and the marking vector.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::net::expr::Expression;
use crate::net::ids::{PlaceId, TransitionId};
use crate::net::index_vec::IndexVec;

/// Token amounts are real-valued because continuous transitions move
/// fractional flow.
pub type Weight = f64;

/// Tolerance used when comparing token amounts.
pub const EPSILON: f64 = 1e-9;

#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
pub struct Place {
    pub name: String,
    pub initial_marking: Weight,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<Weight>,
}

impl Place {
    pub fn new(name: impl Into<String>, initial_marking: Weight) -> Self {
        Self {
            name: name.into(),
            initial_marking,
            capacity: None,
        }
    }

    pub fn with_capacity(mut self, capacity: Weight) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Room left before `capacity` is reached; unbounded places report infinity.
    pub fn headroom(&self, tokens: Weight) -> Weight {
        self.capacity
            .map(|capacity| (capacity - tokens).max(0.0))
            .unwrap_or(f64::INFINITY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKindTag {
    Immediate,
    Timed,
    Stochastic,
    Continuous,
}

impl fmt::Display for TransitionKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransitionKindTag::Immediate => "immediate",
            TransitionKindTag::Timed => "timed",
            TransitionKindTag::Stochastic => "stochastic",
            TransitionKindTag::Continuous => "continuous",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Immediate,
    /// Fires once it has been continuously enabled for a duration inside
    /// `[earliest, latest]`.
    Timed { earliest: f64, latest: f64 },
    /// Exponentially distributed delay with rate `rate`; each firing moves
    /// `weight * burst` tokens per arc.
    Stochastic {
        rate: f64,
        #[serde(default = "default_burst")]
        burst: f64,
    },
    /// Moves `rate * dt * weight` per arc on every integration step. The
    /// evaluated rate is clamped into `[min_rate, max_rate]` when set.
    Continuous {
        rate: Expression,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_rate: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_rate: Option<f64>,
    },
}

fn default_burst() -> f64 {
    1.0
}

impl TransitionKind {
    pub fn tag(&self) -> TransitionKindTag {
        match self {
            TransitionKind::Immediate => TransitionKindTag::Immediate,
            TransitionKind::Timed { .. } => TransitionKindTag::Timed,
            TransitionKind::Stochastic { .. } => TransitionKindTag::Stochastic,
            TransitionKind::Continuous { .. } => TransitionKindTag::Continuous,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Transition {
    pub name: String,
    pub kind: TransitionKind,
    #[serde(default)]
    pub is_source: bool,
    #[serde(default)]
    pub is_sink: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Expression>,
}

impl Transition {
    pub fn new(name: impl Into<String>, kind: TransitionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            is_source: false,
            is_sink: false,
            priority: 0,
            guard: None,
        }
    }

    pub fn immediate(name: impl Into<String>) -> Self {
        Self::new(name, TransitionKind::Immediate)
    }

    pub fn timed(name: impl Into<String>, earliest: f64, latest: f64) -> Self {
        Self::new(name, TransitionKind::Timed { earliest, latest })
    }

    pub fn stochastic(name: impl Into<String>, rate: f64, burst: f64) -> Self {
        Self::new(name, TransitionKind::Stochastic { rate, burst })
    }

    pub fn continuous(name: impl Into<String>, rate: Expression) -> Self {
        Self::new(
            name,
            TransitionKind::Continuous {
                rate,
                min_rate: None,
                max_rate: None,
            },
        )
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_guard(mut self, guard: Expression) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn source(mut self) -> Self {
        self.is_source = true;
        self
    }

    pub fn sink(mut self) -> Self {
        self.is_sink = true;
        self
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transition")
            .field(&self.name)
            .field(&self.kind.tag())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArcDirection {
    PlaceToTransition,
    TransitionToPlace,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArcKind {
    #[default]
    Normal,
    /// Blocks the transition while the place holds at least the requirement.
    Inhibitor,
    /// Catalyst: requires presence, never consumes.
    Test,
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Arc {
    pub place: PlaceId,
    pub transition: TransitionId,
    pub direction: ArcDirection,
    pub weight: Weight,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Expression>,
    #[serde(default)]
    pub kind: ArcKind,
}

impl Arc {
    pub fn new(
        place: PlaceId,
        transition: TransitionId,
        direction: ArcDirection,
        weight: Weight,
    ) -> Self {
        Self {
            place,
            transition,
            direction,
            weight,
            threshold: None,
            kind: ArcKind::Normal,
        }
    }

    pub fn is_input(&self) -> bool {
        self.direction == ArcDirection::PlaceToTransition
    }

    pub fn consumes_tokens(&self) -> bool {
        self.kind == ArcKind::Normal
    }

    /// Amount checked for enablement: the threshold when present, the weight
    /// otherwise. Consumption always uses `weight`.
    pub fn effective_requirement(&self, marking: &Marking, time: f64) -> Weight {
        match &self.threshold {
            Some(threshold) => threshold.eval(marking, time),
            None => self.weight,
        }
    }
}

impl fmt::Debug for Arc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Arc");
        s.field("place", &self.place)
            .field("transition", &self.transition)
            .field("direction", &self.direction)
            .field("weight", &self.weight);
        if let Some(threshold) = &self.threshold {
            s.field("threshold", threshold);
        }
        s.field("kind", &self.kind).finish()
    }
}

/// Token count per place.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Marking(pub IndexVec<PlaceId, Weight>);

impl Marking {
    pub fn new(initial: IndexVec<PlaceId, Weight>) -> Self {
        Self(initial)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlaceId, Weight)> + '_ {
        self.0.iter_enumerated().map(|(place, tokens)| (place, *tokens))
    }

    pub fn tokens(&self, place: PlaceId) -> Weight {
        self.0.get(place).copied().unwrap_or(f64::NAN)
    }

    pub fn tokens_mut(&mut self, place: PlaceId) -> &mut Weight {
        &mut self.0[place]
    }

    pub fn total(&self) -> Weight {
        self.0.iter().sum()
    }

    /// Total tokens over a subset of places.
    pub fn total_of<'a>(&self, places: impl IntoIterator<Item = &'a PlaceId>) -> Weight {
        places.into_iter().map(|place| self.tokens(*place)).sum()
    }

    /// Overwrites every entry with `other`. Both markings must cover the same net.
    pub fn restore_from(&mut self, other: &Marking) {
        debug_assert_eq!(self.len(), other.len());
        self.0.iter_mut().zip(other.0.iter()).for_each(|(dst, src)| *dst = *src);
    }

    /// Entry-wise comparison within [`EPSILON`].
    pub fn approx_eq(&self, other: &Marking) -> bool {
        self.len() == other.len()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|(a, b)| (a - b).abs() <= EPSILON)
    }
}

impl fmt::Debug for Marking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (place, tokens) in self.iter() {
            map.entry(&place, &tokens);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_supersedes_weight_for_requirement() {
        let marking = Marking::new(IndexVec::from(vec![0.0]));
        let mut arc = Arc::new(
            PlaceId::new(0),
            TransitionId::new(0),
            ArcDirection::PlaceToTransition,
            5.0,
        );
        assert_eq!(arc.effective_requirement(&marking, 0.0), 5.0);
        arc.threshold = Some(Expression::parse("10").unwrap());
        assert_eq!(arc.effective_requirement(&marking, 0.0), 10.0);
        assert_eq!(arc.weight, 5.0);
    }

    #[test]
    fn only_normal_arcs_consume() {
        let mut arc = Arc::new(
            PlaceId::new(0),
            TransitionId::new(0),
            ArcDirection::PlaceToTransition,
            1.0,
        );
        assert!(arc.consumes_tokens());
        arc.kind = ArcKind::Inhibitor;
        assert!(!arc.consumes_tokens());
        arc.kind = ArcKind::Test;
        assert!(!arc.consumes_tokens());
    }

    #[test]
    fn headroom_respects_capacity() {
        let place = Place::new("p", 0.0).with_capacity(3.0);
        assert_eq!(place.headroom(1.0), 2.0);
        assert_eq!(place.headroom(5.0), 0.0);
        assert!(Place::new("q", 0.0).headroom(1e9).is_infinite());
    }

    #[test]
    fn transition_kind_serializes_with_type_tag() {
        let t = Transition::timed("T", 1.0, 2.5).with_priority(3);
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"timed\":{\"earliest\":1.0,\"latest\":2.5}"));
        let back: Transition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn restore_from_copies_all_entries() {
        let mut a = Marking::new(IndexVec::from(vec![1.0, 2.0]));
        let b = Marking::new(IndexVec::from(vec![3.0, 4.0]));
        a.restore_from(&b);
        assert!(a.approx_eq(&b));
        assert_eq!(a.total(), 7.0);
    }
}
