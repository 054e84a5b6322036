use std::path::Path;

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use thiserror::Error;

use crate::behavior::{behaviors_for, Behaviors, Clock, Enablement, FireError, FireRecord};
use crate::concurrency::{
    AtomicStepExecutor, ConcurrentSet, ConflictGraph, ExecutionState, MaximalSetFinder,
};
use crate::net::{
    read_net, IoError, Marking, ModelError, Net, NetDocument, TransitionId, TransitionKindTag,
    EPSILON,
};
use crate::simulation::config::SimulationConfig;
use crate::simulation::listener::StepListener;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StepError {
    #[error("livelock: immediate transitions still enabled after {iterations} batches at t={time}")]
    Livelock { iterations: usize, time: f64 },
    #[error("step at t={time} ended {state} on `{transition}`: {source}")]
    Execution {
        transition: String,
        state: ExecutionState,
        time: f64,
        source: FireError,
    },
    #[error("step length must be positive and finite, got {0}")]
    InvalidStep(f64),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepResult {
    /// Discrete transitions fired during the step, in commit order.
    pub fired: Vec<String>,
    /// Simulation time after the step.
    pub time: f64,
    pub immediate_rounds: usize,
    /// Continuous transitions that moved tokens.
    pub integrated: Vec<String>,
}

/// Owns the net, the live marking, one behavior per transition and the
/// clock. The marking is written only by the atomic executor and by
/// [`reset`](Simulation::reset).
pub struct Simulation {
    net: Net,
    marking: Marking,
    behaviors: Behaviors,
    time: f64,
    config: SimulationConfig,
    seed: u64,
    rng: StdRng,
    listeners: Vec<Box<dyn StepListener>>,
}

impl Simulation {
    pub fn new(net: Net, config: SimulationConfig) -> Self {
        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let behaviors = behaviors_for(&net, seed);
        let marking = net.initial_marking();
        let mut simulation = Self {
            net,
            marking,
            behaviors,
            time: 0.0,
            config,
            seed,
            rng: StdRng::seed_from_u64(seed),
            listeners: Vec::new(),
        };
        simulation.reset();
        simulation
    }

    pub fn from_document(
        document: NetDocument,
        config: SimulationConfig,
    ) -> Result<Self, ModelError> {
        Ok(Self::new(document.into_net()?, config))
    }

    /// Reads a `.json` or `.ron` net.
    pub fn load<P: AsRef<Path>>(path: P, config: SimulationConfig) -> Result<Self, IoError> {
        Ok(Self::new(read_net(path)?, config))
    }

    /// Swaps the model and starts over from its initial marking.
    pub fn replace_net(&mut self, net: Net) {
        self.behaviors = behaviors_for(&net, self.seed);
        self.net = net;
        self.reset();
    }

    pub fn net(&self) -> &Net {
        &self.net
    }

    pub fn marking(&self) -> &Marking {
        &self.marking
    }

    pub fn tokens(&self, place: &str) -> Option<f64> {
        self.net.place_id(place).map(|id| self.marking.tokens(id))
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Registers a listener and primes it through `on_reset` with the
    /// current time and marking.
    pub fn add_listener(&mut self, mut listener: Box<dyn StepListener>) {
        listener.on_reset(&self.net, self.time, &self.marking);
        self.listeners.push(listener);
    }

    /// Restores the initial marking, clears every behavior's timing state,
    /// rewinds the clock and notifies listeners.
    pub fn reset(&mut self) {
        self.marking = self.net.initial_marking();
        self.time = 0.0;
        self.rng = StdRng::seed_from_u64(self.seed);
        for behavior in self.behaviors.iter_mut() {
            behavior.reset();
        }
        self.refresh_enablement();
        log::debug!("simulation reset: {} places", self.net.places_len());
        for listener in &mut self.listeners {
            listener.on_reset(&self.net, self.time, &self.marking);
        }
    }

    /// Read-only enablement of every transition, keyed by name.
    pub fn can_fire_all(&self) -> IndexMap<String, Enablement> {
        let clock = Clock::new(self.time, self.config.dt);
        self.net
            .transitions()
            .iter_enumerated()
            .map(|(id, t)| {
                (
                    t.name.clone(),
                    self.behaviors[id].can_fire(&self.net, &self.marking, clock),
                )
            })
            .collect()
    }

    pub fn step_default(&mut self) -> Result<StepResult, StepError> {
        self.step(self.config.dt)
    }

    /// One discrete step: exhaust immediates, fire one batch of due timed
    /// and stochastic transitions, integrate continuous flow, advance the
    /// clock, notify listeners. Atomic: on error the marking, the clock and
    /// every behavior are as they were before the call.
    pub fn step(&mut self, dt: f64) -> Result<StepResult, StepError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(StepError::InvalidStep(dt));
        }
        let marking = self.marking.clone();
        let behaviors = self.behaviors.clone();
        let rng = self.rng.clone();

        match self.advance(dt) {
            Ok(result) => {
                log::debug!(
                    "t={:.4}: fired [{}] integrated [{}] after {} immediate rounds",
                    result.time,
                    result.fired.join(", "),
                    result.integrated.join(", "),
                    result.immediate_rounds
                );
                for listener in &mut self.listeners {
                    listener.on_step(&self.net, result.time, &result.fired, &self.marking);
                }
                Ok(result)
            }
            Err(err) => {
                log::warn!("step failed, marking restored: {err}");
                self.marking = marking;
                self.behaviors = behaviors;
                self.rng = rng;
                Err(err)
            }
        }
    }

    /// Steps with the configured `dt` (the last one shortened) until `until`.
    pub fn run_until(&mut self, until: f64) -> Result<Vec<StepResult>, StepError> {
        let mut results = Vec::new();
        while self.time + EPSILON < until {
            let dt = self.config.dt.min(until - self.time);
            results.push(self.step(dt)?);
        }
        Ok(results)
    }

    fn advance(&mut self, dt: f64) -> Result<StepResult, StepError> {
        let mut result = StepResult::default();
        let now = Clock::new(self.time, dt);

        loop {
            let enabled = self.enabled_of(now, |kind| kind == TransitionKindTag::Immediate);
            if enabled.is_empty() {
                break;
            }
            if result.immediate_rounds >= self.config.max_immediate_iterations {
                log::warn!(
                    "livelock at t={}: {} immediate transitions still enabled",
                    self.time,
                    enabled.len()
                );
                return Err(StepError::Livelock {
                    iterations: result.immediate_rounds,
                    time: self.time,
                });
            }
            let set = self.choose_set(&enabled);
            let records = self.commit(&set, now)?;
            result.fired.extend(self.names(&records));
            result.immediate_rounds += 1;
        }

        let due = self.enabled_of(now, |kind| {
            matches!(kind, TransitionKindTag::Timed | TransitionKindTag::Stochastic)
        });
        if !due.is_empty() {
            let set = self.choose_set(&due);
            let records = self.commit(&set, now)?;
            result.fired.extend(self.names(&records));
        }

        let mut flowing = self.enabled_of(now, |kind| kind == TransitionKindTag::Continuous);
        while !flowing.is_empty() {
            let graph = ConflictGraph::build(&self.net, &flowing);
            let batch = MaximalSetFinder::new(&self.net, &graph).greedy();
            flowing.retain(|t| !batch.contains(t));
            let batch: ConcurrentSet = batch
                .into_iter()
                .filter(|&t| self.behaviors[t].can_fire(&self.net, &self.marking, now).enabled)
                .collect();
            if !batch.is_empty() {
                let records = self.commit(&batch, now)?;
                let moved = records.iter().filter(|record| !record.moved_nothing());
                result.integrated.extend(self.names(moved));
            }
        }

        self.time += dt;
        self.refresh_enablement();
        result.time = self.time;
        Ok(result)
    }

    /// Executes `set` atomically and refreshes timing state; returns the
    /// records in commit order.
    fn commit(
        &mut self,
        set: &[TransitionId],
        clock: Clock,
    ) -> Result<Vec<FireRecord>, StepError> {
        let outcome = AtomicStepExecutor::new(&self.net).execute(
            set,
            &mut self.behaviors,
            &mut self.marking,
            clock,
        );
        if let Some(failure) = outcome.failure {
            return Err(StepError::Execution {
                transition: self.net.transition(failure.transition).name.clone(),
                state: outcome.state,
                time: self.time,
                source: failure.error,
            });
        }
        self.refresh_enablement();
        Ok(outcome.fired)
    }

    fn names<'r>(&self, records: impl IntoIterator<Item = &'r FireRecord>) -> Vec<String> {
        records
            .into_iter()
            .map(|record| self.net.transition(record.transition).name.clone())
            .collect()
    }

    fn choose_set(&mut self, enabled: &[TransitionId]) -> ConcurrentSet {
        let graph = ConflictGraph::build(&self.net, enabled);
        let finder = MaximalSetFinder::new(&self.net, &graph);
        let mut sets = finder.find(self.config.candidate_sets);
        match self.config.strategy.select(&sets, &self.net, &mut self.rng) {
            Some(index) => sets.swap_remove(index),
            None => Vec::new(),
        }
    }

    fn enabled_of(
        &self,
        clock: Clock,
        kind: impl Fn(TransitionKindTag) -> bool,
    ) -> Vec<TransitionId> {
        self.behaviors
            .iter_enumerated()
            .filter(|(_, behavior)| kind(behavior.kind()))
            .filter(|(_, behavior)| behavior.can_fire(&self.net, &self.marking, clock).enabled)
            .map(|(id, _)| id)
            .collect()
    }

    fn refresh_enablement(&mut self) {
        let clock = Clock::at(self.time);
        for behavior in self.behaviors.iter_mut() {
            behavior.update_enablement(&self.net, &self.marking, clock);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::SelectionStrategy;
    use crate::net::{Expression, NetBuilder, Place, Transition};
    use crate::simulation::listener::DataCollector;

    fn config() -> SimulationConfig {
        SimulationConfig {
            seed: Some(11),
            ..SimulationConfig::default()
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn immediates_are_exhausted_within_one_step() {
        let mut builder = NetBuilder::new();
        builder.place("A", 3.0).place("B", 0.0).place("C", 0.0);
        builder
            .transition(Transition::immediate("ab"))
            .transition(Transition::immediate("bc"));
        builder
            .input("A", "ab", 1.0)
            .output("ab", "B", 1.0)
            .input("B", "bc", 1.0)
            .output("bc", "C", 1.0);
        let mut sim = Simulation::new(builder.build().unwrap(), config());

        let result = sim.step(0.1).unwrap();
        assert_eq!(sim.tokens("A"), Some(0.0));
        assert_eq!(sim.tokens("B"), Some(0.0));
        assert_eq!(sim.tokens("C"), Some(3.0));
        assert!(approx(result.time, 0.1));
        assert!(result.immediate_rounds >= 3);
    }

    #[test]
    fn unbounded_source_is_reported_as_livelock() {
        let mut builder = NetBuilder::new();
        builder.place("OUT", 0.0);
        builder.transition(Transition::immediate("gen").source());
        builder.output("gen", "OUT", 1.0);
        let config = SimulationConfig {
            max_immediate_iterations: 5,
            ..config()
        };
        let mut sim = Simulation::new(builder.build().unwrap(), config);

        let err = sim.step(0.1).unwrap_err();
        assert_eq!(
            err,
            StepError::Livelock {
                iterations: 5,
                time: 0.0
            }
        );
        assert_eq!(sim.tokens("OUT"), Some(0.0));
        assert_eq!(sim.time(), 0.0);
    }

    #[test]
    fn reset_reenables_source_transition() {
        let mut builder = NetBuilder::new();
        builder.place("P", 0.0);
        builder.transition(
            Transition::immediate("src")
                .source()
                .with_guard(Expression::parse("P < 1").unwrap()),
        );
        builder.output("src", "P", 1.0);
        let mut sim = Simulation::new(builder.build().unwrap(), config());

        sim.step(0.1).unwrap();
        assert_eq!(sim.tokens("P"), Some(1.0));
        assert!(!sim.can_fire_all()["src"].enabled);

        sim.reset();
        assert_eq!(sim.tokens("P"), Some(0.0));
        assert_eq!(sim.time(), 0.0);
        assert!(sim.can_fire_all()["src"].enabled);
    }

    #[test]
    fn every_construction_path_starts_from_initial_marking() {
        let json = r#"{
            "places": [{"name": "A", "initial_marking": 2.0}, {"name": "B", "initial_marking": 0.0}],
            "transitions": [{"name": "T", "kind": "immediate"}],
            "arcs": [
                {"place": "A", "transition": "T", "direction": "place_to_transition"},
                {"place": "B", "transition": "T", "direction": "transition_to_place"}
            ]
        }"#;
        let document = NetDocument::from_json_str(json).unwrap();
        let mut sim = Simulation::from_document(document.clone(), config()).unwrap();
        sim.step(0.1).unwrap();
        assert_eq!(sim.tokens("B"), Some(2.0));

        sim.replace_net(document.into_net().unwrap());
        assert_eq!(sim.tokens("A"), Some(2.0));
        assert_eq!(sim.tokens("B"), Some(0.0));
        assert_eq!(sim.time(), 0.0);
    }

    #[test]
    fn timed_transition_fires_inside_window() {
        let mut builder = NetBuilder::new();
        builder.place("A", 1.0).place("B", 0.0);
        builder.transition(Transition::timed("T", 0.3, 0.5));
        builder.input("A", "T", 1.0).output("T", "B", 1.0);
        let mut sim = Simulation::new(builder.build().unwrap(), config());

        let mut fired_at = None;
        for _ in 0..10 {
            let before = sim.time();
            let result = sim.step(0.1).unwrap();
            if result.fired.contains(&"T".to_string()) {
                fired_at = Some(before);
                break;
            }
        }
        let fired_at = fired_at.unwrap();
        assert!(fired_at + 1e-9 >= 0.3 && fired_at <= 0.5 + 1e-9, "{fired_at}");
        assert_eq!(sim.tokens("B"), Some(1.0));
    }

    #[test]
    fn timed_transition_fires_at_boundary_when_step_overshoots() {
        let mut builder = NetBuilder::new();
        builder.place("A", 1.0).place("B", 0.0);
        builder.transition(Transition::timed("T", 0.3, 0.4));
        builder.input("A", "T", 1.0).output("T", "B", 1.0);
        let mut sim = Simulation::new(builder.build().unwrap(), config());

        sim.step(0.25).unwrap();
        assert_eq!(sim.tokens("B"), Some(0.0));
        sim.step(0.25).unwrap();
        assert_eq!(sim.tokens("B"), Some(0.0));
        let result = sim.step(0.25).unwrap();
        assert_eq!(result.fired, vec!["T".to_string()]);
        assert_eq!(sim.tokens("B"), Some(1.0));
    }

    #[test]
    fn stochastic_runs_are_reproducible_per_seed() {
        let build = || {
            let mut builder = NetBuilder::new();
            builder.place("A", 20.0).place("B", 0.0);
            builder.transition(Transition::stochastic("S", 3.0, 1.0));
            builder.input("A", "S", 1.0).output("S", "B", 1.0);
            builder.build().unwrap()
        };
        let run = || {
            let mut sim = Simulation::new(build(), config());
            sim.run_until(2.0).unwrap();
            sim.tokens("B")
        };
        assert_eq!(run(), run());

        let mut sim = Simulation::new(build(), config());
        let first = {
            sim.run_until(1.0).unwrap();
            sim.tokens("B")
        };
        sim.reset();
        sim.run_until(1.0).unwrap();
        assert_eq!(sim.tokens("B"), first);
    }

    #[test]
    fn continuous_flow_integrates_each_step() {
        let mut builder = NetBuilder::new();
        builder.place("A", 10.0).place("B", 0.0);
        builder.transition(Transition::continuous("F", Expression::constant(2.0)));
        builder.input("A", "F", 1.0).output("F", "B", 1.0);
        let mut sim = Simulation::new(builder.build().unwrap(), config());

        let results = sim.run_until(1.0).unwrap();
        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.integrated == vec!["F".to_string()]));
        assert!(approx(sim.tokens("A").unwrap(), 8.0));
        assert!(approx(sim.tokens("B").unwrap(), 2.0));
        assert!(approx(sim.time(), 1.0));
    }

    #[test]
    fn blocked_flow_is_not_reported_as_integrated() {
        let mut builder = NetBuilder::new();
        builder
            .place("A", 10.0)
            .add_place(Place::new("B", 1.0).with_capacity(1.0));
        builder.transition(Transition::continuous("F", Expression::constant(2.0)));
        builder.input("A", "F", 1.0).output("F", "B", 1.0);
        let mut sim = Simulation::new(builder.build().unwrap(), config());

        let result = sim.step(0.1).unwrap();
        assert!(result.integrated.is_empty());
        assert_eq!(sim.tokens("A"), Some(10.0));
        assert_eq!(sim.tokens("B"), Some(1.0));
    }

    #[test]
    fn conflicting_continuous_transitions_share_the_step() {
        let mut builder = NetBuilder::new();
        builder.place("A", 1.0).place("B", 0.0).place("C", 0.0);
        builder
            .transition(Transition::continuous("toB", Expression::constant(1.0)))
            .transition(Transition::continuous("toC", Expression::constant(1.0)));
        builder
            .input("A", "toB", 1.0)
            .output("toB", "B", 1.0)
            .input("A", "toC", 1.0)
            .output("toC", "C", 1.0);
        let mut sim = Simulation::new(builder.build().unwrap(), config());
        let result = sim.step(0.1).unwrap();
        assert_eq!(result.integrated.len(), 2);
        assert!(approx(sim.tokens("A").unwrap(), 0.8));
    }

    #[test]
    fn listeners_see_every_step_and_reset() {
        let mut builder = NetBuilder::new();
        builder.place("A", 1.0).place("B", 0.0);
        builder.transition(Transition::immediate("T"));
        builder.input("A", "T", 1.0).output("T", "B", 1.0);
        let mut sim = Simulation::new(builder.build().unwrap(), config());
        let collector = DataCollector::new();
        let trace = collector.handle();
        sim.add_listener(Box::new(collector));

        sim.step(0.1).unwrap();
        sim.step(0.1).unwrap();
        assert_eq!(trace.borrow().len(), 3);
        assert_eq!(trace.borrow().samples[1].fired, vec!["T".to_string()]);
        assert!(trace.borrow().samples[2].fired.is_empty());

        sim.reset();
        assert_eq!(trace.borrow().len(), 1);
        assert_eq!(trace.borrow().series("A").unwrap(), vec![(0.0, 1.0)]);
    }

    #[test]
    fn listener_attached_mid_run_starts_at_current_time() {
        let mut builder = NetBuilder::new();
        builder.place("A", 1.0).place("B", 0.0);
        builder.transition(Transition::immediate("T"));
        builder.input("A", "T", 1.0).output("T", "B", 1.0);
        let mut sim = Simulation::new(builder.build().unwrap(), config());
        sim.step(0.5).unwrap();
        sim.step(0.5).unwrap();

        let collector = DataCollector::new();
        let trace = collector.handle();
        sim.add_listener(Box::new(collector));
        assert_eq!(trace.borrow().series("A").unwrap(), vec![(1.0, 0.0)]);
        assert_eq!(trace.borrow().series("B").unwrap(), vec![(1.0, 1.0)]);

        sim.step(0.5).unwrap();
        assert_eq!(trace.borrow().series("B").unwrap(), vec![(1.0, 1.0), (1.5, 1.0)]);
    }

    #[test]
    fn priority_strategy_prefers_high_priority_branch() {
        let mut builder = NetBuilder::new();
        builder.place("P", 1.0).place("L", 0.0).place("H", 0.0);
        builder
            .transition(Transition::immediate("low"))
            .transition(Transition::immediate("high").with_priority(3));
        builder
            .input("P", "low", 1.0)
            .output("low", "L", 1.0)
            .input("P", "high", 1.0)
            .output("high", "H", 1.0);
        let config = SimulationConfig {
            strategy: SelectionStrategy::Priority,
            ..config()
        };
        let mut sim = Simulation::new(builder.build().unwrap(), config);
        sim.step(0.1).unwrap();
        assert_eq!(sim.tokens("H"), Some(1.0));
        assert_eq!(sim.tokens("L"), Some(0.0));
    }

    #[test]
    fn rejects_bad_step_length() {
        let mut builder = NetBuilder::new();
        builder.place("P", 0.0);
        let mut sim = Simulation::new(builder.build().unwrap(), config());
        assert_eq!(sim.step(0.0), Err(StepError::InvalidStep(0.0)));
        assert!(matches!(sim.step(f64::NAN), Err(StepError::InvalidStep(_))));
    }
}
