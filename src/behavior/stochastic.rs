use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp};

use crate::behavior::arcs::{check_arcs, check_guard, InputCheck};
use crate::behavior::{fire_discrete, Behavior, Clock, Enablement, FireError, FireRecord};
use crate::net::{Marking, Net, TransitionId, TransitionKindTag, EPSILON};

/// Transition with an exponentially distributed firing delay. The delay is
/// sampled when the transition becomes enabled and discarded when it is
/// disabled or fires.
#[derive(Debug, Clone)]
pub struct StochasticBehavior {
    transition: TransitionId,
    rate: f64,
    burst: f64,
    seed: u64,
    rng: StdRng,
    /// `None` when `rate` is not a valid exponential rate; such a transition
    /// is never scheduled.
    delay: Option<Exp<f64>>,
    scheduled_at: Option<f64>,
}

impl StochasticBehavior {
    pub fn new(transition: TransitionId, rate: f64, burst: f64, seed: u64) -> Self {
        let delay = match Exp::new(rate) {
            Ok(delay) => Some(delay),
            Err(err) => {
                log::warn!("stochastic {transition:?} has unusable rate {rate}: {err}");
                None
            }
        };
        Self {
            transition,
            rate,
            burst,
            seed,
            rng: StdRng::seed_from_u64(seed),
            delay,
            scheduled_at: None,
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn scheduled_at(&self) -> Option<f64> {
        self.scheduled_at
    }

    pub fn burst(&self) -> f64 {
        self.burst
    }

    fn sample_delay(&mut self) -> Option<f64> {
        self.delay.map(|delay| delay.sample(&mut self.rng))
    }

    fn structural(&self, net: &Net, marking: &Marking, time: f64) -> Result<(), String> {
        let check = InputCheck::Discrete {
            multiplier: self.burst,
        };
        check_arcs(net, self.transition, marking, time, check)
            .and_then(|()| check_guard(net, self.transition, marking, time))
    }
}

impl Behavior for StochasticBehavior {
    fn transition(&self) -> TransitionId {
        self.transition
    }

    fn kind(&self) -> TransitionKindTag {
        TransitionKindTag::Stochastic
    }

    fn can_fire(&self, net: &Net, marking: &Marking, clock: Clock) -> Enablement {
        if let Err(reason) = self.structural(net, marking, clock.time) {
            return Enablement::disabled(reason);
        }
        match self.scheduled_at {
            None => Enablement::disabled("no firing time sampled"),
            Some(at) if clock.time + EPSILON >= at => {
                Enablement::enabled(format!("sampled firing time {at} reached"))
            }
            Some(at) => Enablement::disabled(format!("scheduled at {at}")),
        }
    }

    fn fire(
        &mut self,
        net: &Net,
        marking: &mut Marking,
        clock: Clock,
    ) -> Result<FireRecord, FireError> {
        let record = fire_discrete(self, net, marking, clock, self.burst)?;
        self.scheduled_at = None;
        Ok(record)
    }

    fn update_enablement(&mut self, net: &Net, marking: &Marking, clock: Clock) {
        match self.structural(net, marking, clock.time) {
            Ok(()) => {
                if self.scheduled_at.is_some() {
                    return;
                }
                if let Some(delay) = self.sample_delay() {
                    log::trace!(
                        "stochastic {} sampled delay {delay} at t={}",
                        net.transition(self.transition).name,
                        clock.time
                    );
                    self.scheduled_at = Some(clock.time + delay);
                }
            }
            Err(_) => self.scheduled_at = None,
        }
    }

    /// Also reseeds the generator so a reset run replays the same delays.
    fn reset(&mut self) {
        self.scheduled_at = None;
        self.rng = StdRng::seed_from_u64(self.seed);
    }

    fn clone_box(&self) -> Box<dyn Behavior> {
        Box::new(self.clone())
    }
}
