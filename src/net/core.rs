//! The net arena: places, transitions, arcs and their adjacency.
use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::net::ids::{PlaceId, TransitionId};
use crate::net::index_vec::IndexVec;
use crate::net::structure::{Arc, Marking, Place, Transition};

pub type ArcList = SmallVec<[usize; 4]>;

/// Connectivity diagnostics, produced for UI/CLI display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnosticReport {
    /// Places without any arc.
    pub isolated_places: Vec<String>,
    /// Transitions without any arc.
    pub isolated_transitions: Vec<String>,
    pub warnings: Vec<String>,
    pub total_places: usize,
    pub total_transitions: usize,
}

impl DiagnosticReport {
    pub fn has_issues(&self) -> bool {
        !self.isolated_places.is_empty()
            || !self.isolated_transitions.is_empty()
            || !self.warnings.is_empty()
    }
}

/// A validated net. Built through [`NetBuilder`](crate::net::NetBuilder);
/// the structure never changes afterwards, only the marking owned by the
/// simulation does.
#[derive(Clone, Debug)]
pub struct Net {
    places: IndexVec<PlaceId, Place>,
    transitions: IndexVec<TransitionId, Transition>,
    arcs: Vec<Arc>,
    place_index: IndexMap<String, PlaceId>,
    transition_index: IndexMap<String, TransitionId>,
    inputs: IndexVec<TransitionId, ArcList>,
    outputs: IndexVec<TransitionId, ArcList>,
}

impl Net {
    /// Assembles the arena. Callers are expected to have validated names and
    /// endpoints (see `NetBuilder::build`).
    pub(crate) fn from_parts(
        places: IndexVec<PlaceId, Place>,
        transitions: IndexVec<TransitionId, Transition>,
        arcs: Vec<Arc>,
    ) -> Self {
        let place_index = places
            .iter_enumerated()
            .map(|(id, place)| (place.name.clone(), id))
            .collect();
        let transition_index = transitions
            .iter_enumerated()
            .map(|(id, transition)| (transition.name.clone(), id))
            .collect();
        let mut inputs: IndexVec<TransitionId, ArcList> =
            IndexVec::from_fn(transitions.len(), |_| ArcList::new());
        let mut outputs = inputs.clone();
        for (idx, arc) in arcs.iter().enumerate() {
            if arc.is_input() {
                inputs[arc.transition].push(idx);
            } else {
                outputs[arc.transition].push(idx);
            }
        }
        Self {
            places,
            transitions,
            arcs,
            place_index,
            transition_index,
            inputs,
            outputs,
        }
    }

    pub fn places(&self) -> &IndexVec<PlaceId, Place> {
        &self.places
    }

    pub fn transitions(&self) -> &IndexVec<TransitionId, Transition> {
        &self.transitions
    }

    pub fn arcs(&self) -> &[Arc] {
        &self.arcs
    }

    pub fn place(&self, id: PlaceId) -> &Place {
        &self.places[id]
    }

    pub fn transition(&self, id: TransitionId) -> &Transition {
        &self.transitions[id]
    }

    pub fn place_id(&self, name: &str) -> Option<PlaceId> {
        self.place_index.get(name).copied()
    }

    pub fn transition_id(&self, name: &str) -> Option<TransitionId> {
        self.transition_index.get(name).copied()
    }

    pub fn places_len(&self) -> usize {
        self.places.len()
    }

    pub fn transitions_len(&self) -> usize {
        self.transitions.len()
    }

    /// Input arcs (place -> transition) of `transition`, in declaration order.
    pub fn inputs(&self, transition: TransitionId) -> impl Iterator<Item = &Arc> + '_ {
        self.inputs[transition].iter().map(|&idx| &self.arcs[idx])
    }

    /// Output arcs (transition -> place) of `transition`, in declaration order.
    pub fn outputs(&self, transition: TransitionId) -> impl Iterator<Item = &Arc> + '_ {
        self.outputs[transition].iter().map(|&idx| &self.arcs[idx])
    }

    pub fn initial_marking(&self) -> Marking {
        Marking::new(self.places.iter().map(|p| p.initial_marking).collect())
    }

    /// Ordering used wherever a deterministic transition order is needed:
    /// priority descending, then name ascending.
    pub fn firing_order(&self, a: TransitionId, b: TransitionId) -> std::cmp::Ordering {
        let (ta, tb) = (&self.transitions[a], &self.transitions[b]);
        tb.priority
            .cmp(&ta.priority)
            .then_with(|| ta.name.cmp(&tb.name))
    }

    pub fn sort_by_firing_order(&self, transitions: &mut [TransitionId]) {
        transitions.sort_by(|&a, &b| self.firing_order(a, b));
    }

    pub fn diagnose_connectivity(&self) -> DiagnosticReport {
        let mut isolated_places = Vec::new();
        let mut isolated_transitions = Vec::new();
        let mut warnings = Vec::new();

        for (place_id, place) in self.places.iter_enumerated() {
            let has_input = self
                .arcs
                .iter()
                .any(|arc| arc.place == place_id && !arc.is_input());
            let has_output = self
                .arcs
                .iter()
                .any(|arc| arc.place == place_id && arc.is_input());

            if !has_input && !has_output {
                isolated_places.push(place.name.clone());
            } else if !has_input && place.initial_marking <= 0.0 {
                warnings.push(format!(
                    "place '{}' has no producing arc and starts empty",
                    place.name
                ));
            }
        }

        for (transition_id, transition) in self.transitions.iter_enumerated() {
            let has_preset = !self.inputs[transition_id].is_empty();
            let has_postset = !self.outputs[transition_id].is_empty();

            if !has_preset && !has_postset {
                isolated_transitions.push(transition.name.clone());
            } else if !has_preset && !transition.is_source {
                warnings.push(format!(
                    "transition '{}' has no input place and is not a source; it is always enabled",
                    transition.name
                ));
            } else if !has_postset && !transition.is_sink {
                warnings.push(format!(
                    "transition '{}' has no output place and is not a sink",
                    transition.name
                ));
            }
        }

        DiagnosticReport {
            isolated_places,
            isolated_transitions,
            warnings,
            total_places: self.places_len(),
            total_transitions: self.transitions_len(),
        }
    }

    pub fn log_diagnostics(&self) {
        let report = self.diagnose_connectivity();

        if report.has_issues() {
            log::warn!(
                "net diagnostics: {} places, {} transitions",
                report.total_places,
                report.total_transitions
            );
            for name in &report.isolated_places {
                log::warn!("  isolated place {name}");
            }
            for name in &report.isolated_transitions {
                log::warn!("  isolated transition {name}");
            }
            for warning in &report.warnings {
                log::warn!("  {warning}");
            }
        } else {
            log::info!("net connectivity check passed");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::net::NetBuilder;
    use crate::net::structure::Transition;

    #[test]
    fn adjacency_lists_follow_declaration_order() {
        let mut builder = NetBuilder::new();
        builder.place("P1", 1.0).place("P2", 0.0).place("P3", 0.0);
        builder.transition(Transition::immediate("T"));
        builder.input("P2", "T", 1.0).input("P1", "T", 2.0);
        builder.output("T", "P3", 1.0);
        let net = builder.build().unwrap();

        let t = net.transition_id("T").unwrap();
        let inputs: Vec<_> = net
            .inputs(t)
            .map(|arc| net.place(arc.place).name.as_str())
            .collect();
        assert_eq!(inputs, vec!["P2", "P1"]);
        assert_eq!(net.outputs(t).count(), 1);
        assert_eq!(net.initial_marking().total(), 1.0);
    }

    #[test]
    fn firing_order_is_priority_then_name() {
        let mut builder = NetBuilder::new();
        builder.transition(Transition::immediate("b").with_priority(1));
        builder.transition(Transition::immediate("a").with_priority(1));
        builder.transition(Transition::immediate("z").with_priority(5));
        let net = builder.build().unwrap();

        let mut ids: Vec<_> = net.transitions().ids().collect();
        net.sort_by_firing_order(&mut ids);
        let names: Vec<_> = ids
            .iter()
            .map(|&t| net.transition(t).name.as_str())
            .collect();
        assert_eq!(names, vec!["z", "a", "b"]);
    }

    #[test]
    fn diagnostics_flag_isolated_nodes() {
        let mut builder = NetBuilder::new();
        builder.place("lonely", 0.0).place("P", 1.0).place("Q", 0.0);
        builder.transition(Transition::immediate("idle"));
        builder.transition(Transition::immediate("T"));
        builder.input("P", "T", 1.0).output("T", "Q", 1.0);
        let net = builder.build().unwrap();

        let report = net.diagnose_connectivity();
        assert_eq!(report.isolated_places, vec!["lonely".to_string()]);
        assert_eq!(report.isolated_transitions, vec!["idle".to_string()]);
        assert!(report.has_issues());
    }
}
