use crate::concurrency::locality::ConflictGraph;
use crate::net::{Net, TransitionId};

/// A set of pairwise independent transitions, sorted in firing order.
pub type ConcurrentSet = Vec<TransitionId>;

/// Finds maximal independent sets of a conflict graph.
///
/// Candidates are visited in firing order (priority descending, then name),
/// so results are deterministic for a given net and enabled set.
pub struct MaximalSetFinder<'a> {
    net: &'a Net,
    graph: &'a ConflictGraph,
    order: Vec<TransitionId>,
}

impl<'a> MaximalSetFinder<'a> {
    pub fn new(net: &'a Net, graph: &'a ConflictGraph) -> Self {
        let mut order: Vec<_> = graph.transitions().collect();
        net.sort_by_firing_order(&mut order);
        Self { net, graph, order }
    }

    /// Greedy pass: start from `seed` (assumed independent) and add every
    /// candidate that conflicts with nothing already chosen.
    pub fn greedy_from(&self, seed: &[TransitionId]) -> ConcurrentSet {
        let mut set: ConcurrentSet = seed.to_vec();
        for &candidate in &self.order {
            if set.contains(&candidate) {
                continue;
            }
            if set.iter().all(|&member| !self.graph.conflicts(member, candidate)) {
                set.push(candidate);
            }
        }
        self.net.sort_by_firing_order(&mut set);
        set
    }

    pub fn greedy(&self) -> ConcurrentSet {
        self.greedy_from(&[])
    }

    /// Up to `limit` distinct maximal sets. The first is the plain greedy
    /// pass; the rest are greedy passes seeded by each candidate and then by
    /// each independent pair. With an unbounded limit any two independent
    /// transitions share at least one returned set.
    pub fn find(&self, limit: usize) -> Vec<ConcurrentSet> {
        let mut found: Vec<ConcurrentSet> = Vec::new();
        if self.order.is_empty() || limit == 0 {
            return found;
        }

        let offer = |set: ConcurrentSet, found: &mut Vec<ConcurrentSet>| {
            if !found.contains(&set) {
                found.push(set);
            }
            found.len() >= limit
        };

        if offer(self.greedy(), &mut found) {
            return found;
        }
        for &candidate in &self.order {
            if offer(self.greedy_from(&[candidate]), &mut found) {
                return found;
            }
        }
        for (i, &a) in self.order.iter().enumerate() {
            for &b in &self.order[i + 1..] {
                if self.graph.conflicts(a, b) {
                    continue;
                }
                if found.iter().any(|set| set.contains(&a) && set.contains(&b)) {
                    continue;
                }
                if offer(self.greedy_from(&[a, b]), &mut found) {
                    return found;
                }
            }
        }
        found
    }

    /// Every maximal independent set (Bron–Kerbosch over the complement of
    /// the conflict graph). Exponential in the worst case; meant for small
    /// enabled sets and tests.
    pub fn enumerate_all(&self) -> Vec<ConcurrentSet> {
        let mut out = Vec::new();
        self.bron_kerbosch(Vec::new(), self.order.clone(), Vec::new(), &mut out);
        for set in &mut out {
            self.net.sort_by_firing_order(set);
        }
        out
    }

    fn bron_kerbosch(
        &self,
        chosen: Vec<TransitionId>,
        mut candidates: Vec<TransitionId>,
        mut excluded: Vec<TransitionId>,
        out: &mut Vec<ConcurrentSet>,
    ) {
        if candidates.is_empty() {
            if excluded.is_empty() {
                out.push(chosen);
            }
            return;
        }
        let compatible = |a: TransitionId, b: TransitionId| a != b && !self.graph.conflicts(a, b);

        while let Some(v) = candidates.first().copied() {
            let mut next = chosen.clone();
            next.push(v);
            let keep = |list: &[TransitionId]| -> Vec<TransitionId> {
                list.iter().copied().filter(|&u| compatible(u, v)).collect()
            };
            self.bron_kerbosch(next, keep(&candidates), keep(&excluded), out);
            candidates.remove(0);
            excluded.push(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{NetBuilder, Transition};

    /// T1 and T3 share P1; T3b reads only P3.
    fn fork() -> (Net, Vec<TransitionId>) {
        let mut builder = NetBuilder::new();
        builder
            .place("P1", 2.0)
            .place("P2", 0.0)
            .place("P3", 1.0)
            .place("P4", 0.0)
            .place("P5", 0.0);
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
            .output("T3b", "P5", 1.0);
        let net = builder.build().unwrap();
        let ids = ["T1", "T3", "T3b"]
            .iter()
            .map(|n| net.transition_id(n).unwrap())
            .collect();
        (net, ids)
    }

    fn is_maximal(graph: &ConflictGraph, set: &[TransitionId]) -> bool {
        graph.is_independent(set)
            && graph.transitions().all(|t| {
                set.contains(&t) || set.iter().any(|&member| graph.conflicts(member, t))
            })
    }

    #[test]
    fn conflicting_pair_is_never_together() {
        let (net, ids) = fork();
        let (t1, t3) = (ids[0], ids[1]);
        let graph = ConflictGraph::build(&net, &[t1, t3]);
        let sets = MaximalSetFinder::new(&net, &graph).find(usize::MAX);
        assert!(sets.contains(&vec![t1]));
        assert!(sets.contains(&vec![t3]));
        assert!(sets.iter().all(|s| !(s.contains(&t1) && s.contains(&t3))));
    }

    #[test]
    fn every_returned_set_is_maximal() {
        let (net, ids) = fork();
        let graph = ConflictGraph::build(&net, &ids);
        let sets = MaximalSetFinder::new(&net, &graph).find(usize::MAX);
        assert_eq!(sets.len(), 2);
        for set in &sets {
            assert!(is_maximal(&graph, set), "{set:?}");
        }
    }

    #[test]
    fn independent_transitions_share_a_set() {
        let (net, ids) = fork();
        let graph = ConflictGraph::build(&net, &ids);
        let sets = MaximalSetFinder::new(&net, &graph).find(usize::MAX);
        for &a in &ids {
            for &b in &ids {
                if a != b && !graph.conflicts(a, b) {
                    assert!(sets.iter().any(|s| s.contains(&a) && s.contains(&b)));
                }
            }
        }
    }

    #[test]
    fn greedy_prefers_higher_priority() {
        let mut builder = NetBuilder::new();
        builder.place("P", 1.0).place("Q", 0.0);
        builder
            .transition(Transition::immediate("low"))
            .transition(Transition::immediate("high").with_priority(5));
        builder
            .input("P", "low", 1.0)
            .output("low", "Q", 1.0)
            .input("P", "high", 1.0)
            .output("high", "Q", 1.0);
        let net = builder.build().unwrap();
        let low = net.transition_id("low").unwrap();
        let high = net.transition_id("high").unwrap();
        let graph = ConflictGraph::build(&net, &[low, high]);
        assert_eq!(MaximalSetFinder::new(&net, &graph).greedy(), vec![high]);
    }

    #[test]
    fn limit_caps_result_count() {
        let (net, ids) = fork();
        let graph = ConflictGraph::build(&net, &ids);
        let finder = MaximalSetFinder::new(&net, &graph);
        assert_eq!(finder.find(1).len(), 1);
        assert!(finder.find(0).is_empty());
    }

    #[test]
    fn enumerate_all_matches_find_on_small_graphs() {
        let (net, ids) = fork();
        let graph = ConflictGraph::build(&net, &ids);
        let finder = MaximalSetFinder::new(&net, &graph);
        let mut all = finder.enumerate_all();
        let mut found = finder.find(usize::MAX);
        all.sort();
        found.sort();
        assert_eq!(all, found);
    }

    #[test]
    fn empty_enabled_set_yields_nothing() {
        let (net, _) = fork();
        let graph = ConflictGraph::build(&net, &[]);
        assert!(MaximalSetFinder::new(&net, &graph).find(4).is_empty());
    }
}
