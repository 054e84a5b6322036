//! Locality of a transition and the conflict graph over enabled transitions.
use std::collections::BTreeSet;

use indexmap::IndexMap;
use petgraph::graph::{NodeIndex, UnGraph};

use crate::net::{Net, PlaceId, TransitionId, TransitionKind};

/// Places a transition reads or writes: every arc endpoint regardless of arc
/// kind, plus the places named in its guard, thresholds and rate function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locality {
    pub transition: TransitionId,
    pub places: BTreeSet<PlaceId>,
}

impl Locality {
    pub fn of(net: &Net, transition: TransitionId) -> Self {
        let mut places = BTreeSet::new();
        for arc in net.inputs(transition).chain(net.outputs(transition)) {
            places.insert(arc.place);
            if let Some(threshold) = &arc.threshold {
                places.extend(threshold.places());
            }
        }
        let t = net.transition(transition);
        if let Some(guard) = &t.guard {
            places.extend(guard.places());
        }
        if let TransitionKind::Continuous { rate, .. } = &t.kind {
            places.extend(rate.places());
        }
        Self { transition, places }
    }

    pub fn conflicts_with(&self, other: &Locality) -> bool {
        !self.places.is_disjoint(&other.places)
    }
}

/// Whether `a` and `b` share any place of their localities.
pub fn conflicts(net: &Net, a: TransitionId, b: TransitionId) -> bool {
    a != b && Locality::of(net, a).conflicts_with(&Locality::of(net, b))
}

/// Undirected graph with one node per enabled transition and an edge for
/// every pair whose localities intersect. Rebuilt every time it is needed.
#[derive(Debug, Clone)]
pub struct ConflictGraph {
    graph: UnGraph<TransitionId, ()>,
    nodes: IndexMap<TransitionId, NodeIndex>,
}

impl ConflictGraph {
    pub fn build(net: &Net, enabled: &[TransitionId]) -> Self {
        let mut graph = UnGraph::with_capacity(enabled.len(), 0);
        let mut nodes = IndexMap::with_capacity(enabled.len());
        let mut localities = Vec::with_capacity(enabled.len());
        for &transition in enabled {
            if nodes.contains_key(&transition) {
                continue;
            }
            nodes.insert(transition, graph.add_node(transition));
            localities.push(Locality::of(net, transition));
        }

        for (i, a) in localities.iter().enumerate() {
            for b in &localities[i + 1..] {
                if a.conflicts_with(b) {
                    graph.add_edge(nodes[&a.transition], nodes[&b.transition], ());
                }
            }
        }
        Self { graph, nodes }
    }

    pub fn transitions(&self) -> impl Iterator<Item = TransitionId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn contains(&self, transition: TransitionId) -> bool {
        self.nodes.contains_key(&transition)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Transitions not in the graph conflict with nothing.
    pub fn conflicts(&self, a: TransitionId, b: TransitionId) -> bool {
        match (self.nodes.get(&a), self.nodes.get(&b)) {
            (Some(&na), Some(&nb)) => self.graph.contains_edge(na, nb),
            _ => false,
        }
    }

    pub fn neighbors(&self, transition: TransitionId) -> Vec<TransitionId> {
        match self.nodes.get(&transition) {
            Some(&node) => self.graph.neighbors(node).map(|n| self.graph[n]).collect(),
            None => Vec::new(),
        }
    }

    /// True when no two members of `set` share an edge.
    pub fn is_independent(&self, set: &[TransitionId]) -> bool {
        set.iter()
            .enumerate()
            .all(|(i, &a)| set[i + 1..].iter().all(|&b| !self.conflicts(a, b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Expression, NetBuilder, Transition};

    fn fork() -> Net {
        let mut builder = NetBuilder::new();
        builder
            .place("P1", 2.0)
            .place("P2", 0.0)
            .place("P3", 1.0)
            .place("P4", 0.0);
        builder
            .transition(Transition::immediate("T1"))
            .transition(Transition::immediate("T3"))
            .transition(Transition::immediate("T3b"));
        builder
            .input("P1", "T1", 1.0)
            .output("T1", "P2", 1.0)
            .input("P1", "T3", 1.0)
            .output("T3", "P4", 1.0)
            .input("P3", "T3b", 1.0)
            .output("T3b", "P4", 1.0);
        builder.build().unwrap()
    }

    fn ids(net: &Net, names: &[&str]) -> Vec<TransitionId> {
        names.iter().map(|n| net.transition_id(n).unwrap()).collect()
    }

    #[test]
    fn shared_input_is_a_conflict() {
        let net = fork();
        let t = ids(&net, &["T1", "T3", "T3b"]);
        let (t1, t3, t3b) = (t[0], t[1], t[2]);
        assert!(conflicts(&net, t1, t3));
        assert!(!conflicts(&net, t1, t3b));
        assert!(conflicts(&net, t3, t3b));
        assert!(!conflicts(&net, t1, t1));
    }

    #[test]
    fn read_only_arcs_count_toward_locality() {
        let mut builder = NetBuilder::new();
        builder.place("A", 1.0).place("B", 1.0).place("S", 0.0);
        builder
            .transition(Transition::immediate("W"))
            .transition(Transition::immediate("R"));
        builder
            .input("A", "W", 1.0)
            .output("W", "S", 1.0)
            .inhibitor("S", "R", 1.0)
            .input("B", "R", 1.0);
        let net = builder.build().unwrap();
        let w = net.transition_id("W").unwrap();
        let r = net.transition_id("R").unwrap();
        assert!(conflicts(&net, w, r));
    }

    #[test]
    fn guard_places_count_toward_locality() {
        let mut builder = NetBuilder::new();
        builder.place("A", 1.0).place("B", 1.0).place("C", 0.0);
        builder
            .transition(Transition::immediate("W"))
            .transition(
                Transition::immediate("G").with_guard(Expression::parse("C < 1").unwrap()),
            );
        builder
            .input("A", "W", 1.0)
            .output("W", "C", 1.0)
            .input("B", "G", 1.0);
        let net = builder.build().unwrap();
        let g = net.transition_id("G").unwrap();
        assert!(Locality::of(&net, g).places.contains(&net.place_id("C").unwrap()));
        assert!(conflicts(&net, net.transition_id("W").unwrap(), g));
    }

    #[test]
    fn graph_edges_follow_localities() {
        let net = fork();
        let enabled = ids(&net, &["T1", "T3", "T3b"]);
        let graph = ConflictGraph::build(&net, &enabled);
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.conflicts(enabled[0], enabled[1]));
        assert!(!graph.conflicts(enabled[0], enabled[2]));
        assert!(graph.is_independent(&[enabled[0], enabled[2]]));
        assert!(!graph.is_independent(&enabled));
        assert_eq!(graph.neighbors(enabled[1]).len(), 2);
    }
}
