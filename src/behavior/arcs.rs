//! Per-arc enablement checks and token transfer shared by every behavior.
//!
//! All four transition kinds consume and produce through [`TransferPlan`], so
//! the source/sink and inhibitor/test skips live in exactly one loop.
use indexmap::IndexMap;

use crate::behavior::FireError;
use crate::net::{ArcKind, Marking, Net, PlaceId, TransitionId, Weight, EPSILON};

/// How normal input arcs are checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputCheck {
    /// Discrete firing of `weight * multiplier` per arc: the place must hold
    /// the effective requirement and enough tokens to cover the consumption.
    Discrete { multiplier: f64 },
    /// Continuous flow: the place must be non-empty (or reach its threshold).
    Continuous,
}

/// Checks every arc of `transition` against `marking`.
///
/// Returns `Err(reason)` naming the first arc that blocks the transition.
/// Source transitions skip every input check; sink transitions skip the
/// capacity check on outputs.
pub fn check_arcs(
    net: &Net,
    transition: TransitionId,
    marking: &Marking,
    time: f64,
    check: InputCheck,
) -> Result<(), String> {
    let t = net.transition(transition);

    if !t.is_source {
        for arc in net.inputs(transition) {
            let tokens = marking.tokens(arc.place);
            let requirement = arc.effective_requirement(marking, time);
            let place = &net.place(arc.place).name;
            match arc.kind {
                ArcKind::Normal => match check {
                    InputCheck::Discrete { multiplier } => {
                        let needed = requirement.max(arc.weight * multiplier);
                        if !(tokens + EPSILON >= needed) {
                            return Err(format!(
                                "input {place} has {tokens}, needs {needed}"
                            ));
                        }
                    }
                    InputCheck::Continuous => {
                        let floor = if arc.threshold.is_some() {
                            requirement
                        } else {
                            EPSILON
                        };
                        if !(tokens > EPSILON && tokens + EPSILON >= floor) {
                            return Err(format!("input {place} is empty"));
                        }
                    }
                },
                ArcKind::Inhibitor => {
                    if !(tokens + EPSILON < requirement) {
                        return Err(format!(
                            "inhibited by {place} ({tokens} >= {requirement})"
                        ));
                    }
                }
                ArcKind::Test => {
                    let floor = if arc.threshold.is_some() {
                        requirement
                    } else {
                        EPSILON
                    };
                    if !(tokens > EPSILON && tokens + EPSILON >= floor) {
                        return Err(format!("test arc on {place} not satisfied ({tokens})"));
                    }
                }
            }
        }
    }

    if let (InputCheck::Discrete { multiplier }, false) = (check, t.is_sink) {
        let plan = TransferPlan::build(net, transition, multiplier);
        for (&place, &amount) in &plan.produced {
            let after = marking.tokens(place) - plan.consumed.get(&place).copied().unwrap_or(0.0)
                + amount;
            if let Some(capacity) = net.place(place).capacity {
                if after > capacity + EPSILON {
                    return Err(format!(
                        "output {} would reach {after} above capacity {capacity}",
                        net.place(place).name
                    ));
                }
            }
        }
    }

    Ok(())
}

/// Evaluates the guard of `transition`; transitions without a guard pass.
pub fn check_guard(
    net: &Net,
    transition: TransitionId,
    marking: &Marking,
    time: f64,
) -> Result<(), String> {
    match &net.transition(transition).guard {
        Some(guard) if !guard.holds(marking, time) => Err(format!("guard `{guard}` is false")),
        _ => Ok(()),
    }
}

/// Token deltas of one firing, aggregated per place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferPlan {
    pub consumed: IndexMap<PlaceId, Weight>,
    pub produced: IndexMap<PlaceId, Weight>,
}

impl TransferPlan {
    /// Collects `weight * multiplier` for every consuming input arc (unless
    /// the transition is a source) and every output arc (unless it is a sink).
    pub fn build(net: &Net, transition: TransitionId, multiplier: f64) -> Self {
        let t = net.transition(transition);
        let mut plan = TransferPlan::default();

        for arc in net.inputs(transition) {
            if t.is_source || !arc.consumes_tokens() {
                continue;
            }
            *plan.consumed.entry(arc.place).or_insert(0.0) += arc.weight * multiplier;
        }
        for arc in net.outputs(transition) {
            if t.is_sink {
                continue;
            }
            *plan.produced.entry(arc.place).or_insert(0.0) += arc.weight * multiplier;
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.consumed.is_empty() && self.produced.is_empty()
    }

    /// Largest factor `f` such that applying `self` scaled by `f` keeps every
    /// input non-negative and every output within capacity. Unbounded plans
    /// (a source into uncapped places) yield infinity.
    pub fn feasible_scale(&self, net: &Net, marking: &Marking) -> f64 {
        let mut fraction = f64::INFINITY;
        for (&place, &amount) in &self.consumed {
            if amount > 0.0 {
                fraction = fraction.min(marking.tokens(place).max(0.0) / amount);
            }
        }
        for (&place, &amount) in &self.produced {
            let growth = amount - self.consumed.get(&place).copied().unwrap_or(0.0);
            if growth > 0.0 {
                let headroom = net.place(place).headroom(marking.tokens(place));
                fraction = fraction.min(headroom / growth);
            }
        }
        fraction.max(0.0)
    }

    pub fn scaled(&self, factor: f64) -> Self {
        TransferPlan {
            consumed: self
                .consumed
                .iter()
                .map(|(&place, &amount)| (place, amount * factor))
                .collect(),
            produced: self
                .produced
                .iter()
                .map(|(&place, &amount)| (place, amount * factor))
                .collect(),
        }
    }

    /// Verifies the whole plan first and only then mutates `marking`, so a
    /// failing plan leaves every place untouched.
    pub fn apply(
        &self,
        net: &Net,
        transition: TransitionId,
        marking: &mut Marking,
    ) -> Result<(), FireError> {
        let name = || net.transition(transition).name.clone();

        for (&place, &amount) in &self.consumed {
            let available = marking.tokens(place);
            if !(available + EPSILON >= amount) {
                return Err(FireError::Shortfall {
                    transition: name(),
                    place: net.place(place).name.clone(),
                    required: amount,
                    available,
                });
            }
        }
        for (&place, &amount) in &self.produced {
            if let Some(capacity) = net.place(place).capacity {
                let after = marking.tokens(place)
                    - self.consumed.get(&place).copied().unwrap_or(0.0)
                    + amount;
                if after > capacity + EPSILON {
                    return Err(FireError::CapacityExceeded {
                        transition: name(),
                        place: net.place(place).name.clone(),
                        after,
                        capacity,
                    });
                }
            }
        }

        for (&place, &amount) in &self.consumed {
            let tokens = marking.tokens_mut(place);
            *tokens = (*tokens - amount).max(0.0);
        }
        for (&place, &amount) in &self.produced {
            *marking.tokens_mut(place) += amount;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{ArcSpec, Expression, NetBuilder, Place, Transition};

    fn two_inputs() -> Net {
        let mut builder = NetBuilder::new();
        builder.place("A", 10.0).place("B", 10.0).place("C", 0.0);
        builder.transition(Transition::immediate("T"));
        builder
            .input("A", "T", 2.0)
            .input("B", "T", 3.0)
            .output("T", "C", 1.0);
        builder.build().unwrap()
    }

    #[test]
    fn plan_covers_every_input_arc() {
        let net = two_inputs();
        let t = net.transition_id("T").unwrap();
        let plan = TransferPlan::build(&net, t, 1.0);
        assert_eq!(plan.consumed.len(), 2);
        assert_eq!(plan.consumed[&net.place_id("A").unwrap()], 2.0);
        assert_eq!(plan.consumed[&net.place_id("B").unwrap()], 3.0);
        assert_eq!(plan.produced[&net.place_id("C").unwrap()], 1.0);
    }

    #[test]
    fn shortfall_leaves_marking_untouched() {
        let net = two_inputs();
        let t = net.transition_id("T").unwrap();
        let mut marking = net.initial_marking();
        *marking.tokens_mut(net.place_id("B").unwrap()) = 1.0;
        let before = marking.clone();

        let err = TransferPlan::build(&net, t, 1.0)
            .apply(&net, t, &mut marking)
            .unwrap_err();
        assert!(matches!(err, FireError::Shortfall { ref place, .. } if place == "B"));
        assert_eq!(marking, before);
    }

    #[test]
    fn inhibitor_and_test_arcs_are_skipped_by_plan() {
        let mut builder = NetBuilder::new();
        builder.place("I", 0.0).place("K", 1.0).place("O", 0.0);
        builder.transition(Transition::immediate("T"));
        builder
            .inhibitor("I", "T", 1.0)
            .test_arc("K", "T", 1.0)
            .output("T", "O", 1.0);
        let net = builder.build().unwrap();
        let t = net.transition_id("T").unwrap();
        let plan = TransferPlan::build(&net, t, 1.0);
        assert!(plan.consumed.is_empty());
        assert!(check_arcs(&net, t, &net.initial_marking(), 0.0, InputCheck::Discrete {
            multiplier: 1.0
        })
        .is_ok());
    }

    #[test]
    fn threshold_gates_but_weight_is_consumed() {
        let mut builder = NetBuilder::new();
        builder.place("P", 7.0).place("Q", 0.0);
        builder.transition(Transition::immediate("T"));
        builder
            .arc(ArcSpec::input("P", "T", 5.0).with_threshold(Expression::parse("10").unwrap()))
            .output("T", "Q", 1.0);
        let net = builder.build().unwrap();
        let t = net.transition_id("T").unwrap();
        let discrete = InputCheck::Discrete { multiplier: 1.0 };

        let mut marking = net.initial_marking();
        assert!(check_arcs(&net, t, &marking, 0.0, discrete).is_err());
        *marking.tokens_mut(net.place_id("P").unwrap()) = 10.0;
        assert!(check_arcs(&net, t, &marking, 0.0, discrete).is_ok());
        assert_eq!(
            TransferPlan::build(&net, t, 1.0).consumed[&net.place_id("P").unwrap()],
            5.0
        );
    }

    #[test]
    fn threshold_below_weight_still_needs_the_weight() {
        let mut builder = NetBuilder::new();
        builder.place("P", 3.0).place("Q", 0.0);
        builder.transition(Transition::immediate("T"));
        builder
            .arc(ArcSpec::input("P", "T", 5.0).with_threshold(Expression::parse("2").unwrap()))
            .output("T", "Q", 1.0);
        let net = builder.build().unwrap();
        let t = net.transition_id("T").unwrap();
        let discrete = InputCheck::Discrete { multiplier: 1.0 };

        let mut marking = net.initial_marking();
        let reason = check_arcs(&net, t, &marking, 0.0, discrete).unwrap_err();
        assert!(reason.contains("needs 5"), "{reason}");
        *marking.tokens_mut(net.place_id("P").unwrap()) = 5.0;
        assert!(check_arcs(&net, t, &marking, 0.0, discrete).is_ok());
    }

    #[test]
    fn capacity_blocks_discrete_enablement() {
        let mut builder = NetBuilder::new();
        builder.place("P", 1.0);
        builder.add_place(Place::new("Q", 2.0).with_capacity(2.0));
        builder.transition(Transition::immediate("T"));
        builder.input("P", "T", 1.0).output("T", "Q", 1.0);
        let net = builder.build().unwrap();
        let t = net.transition_id("T").unwrap();
        let reason = check_arcs(
            &net,
            t,
            &net.initial_marking(),
            0.0,
            InputCheck::Discrete { multiplier: 1.0 },
        )
        .unwrap_err();
        assert!(reason.contains("capacity"));
    }

    #[test]
    fn feasible_scale_limits_by_inputs_and_capacity() {
        let mut builder = NetBuilder::new();
        builder.place("P", 0.5);
        builder.add_place(Place::new("Q", 0.0).with_capacity(0.2));
        builder.transition(Transition::immediate("T"));
        builder.input("P", "T", 1.0).output("T", "Q", 1.0);
        let net = builder.build().unwrap();
        let t = net.transition_id("T").unwrap();
        let plan = TransferPlan::build(&net, t, 1.0);
        assert!((plan.feasible_scale(&net, &net.initial_marking()) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn feasible_scale_is_unbounded_for_uncapped_source() {
        let mut builder = NetBuilder::new();
        builder.place("Q", 0.0);
        builder.transition(Transition::immediate("T").source());
        builder.output("T", "Q", 1.0);
        let net = builder.build().unwrap();
        let t = net.transition_id("T").unwrap();
        let plan = TransferPlan::build(&net, t, 1.0);
        assert!(plan.feasible_scale(&net, &net.initial_marking()).is_infinite());
    }
}
