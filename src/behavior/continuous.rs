use crate::behavior::arcs::{check_arcs, check_guard, InputCheck, TransferPlan};
use crate::behavior::{Behavior, Clock, Enablement, FireError, FireRecord};
use crate::net::{Expression, Marking, Net, TransitionId, TransitionKindTag, EPSILON};

/// Fluid transition. Each call to [`fire`](Behavior::fire) integrates one
/// step of length `clock.dt`, moving `rate * dt * weight` per arc.
#[derive(Debug, Clone)]
pub struct ContinuousBehavior {
    transition: TransitionId,
    rate: Expression,
    min_rate: Option<f64>,
    max_rate: Option<f64>,
}

impl ContinuousBehavior {
    pub fn new(
        transition: TransitionId,
        rate: Expression,
        min_rate: Option<f64>,
        max_rate: Option<f64>,
    ) -> Self {
        Self {
            transition,
            rate,
            min_rate,
            max_rate,
        }
    }

    /// Rate function evaluated at `marking`, clamped into the configured
    /// bounds. NaN stays NaN.
    pub fn current_rate(&self, marking: &Marking, time: f64) -> f64 {
        let mut rate = self.rate.eval(marking, time);
        if let Some(min) = self.min_rate {
            rate = rate.max(min);
        }
        if let Some(max) = self.max_rate {
            rate = rate.min(max);
        }
        rate
    }

    /// Single rate evaluation per step (forward Euler). The flow is cut to
    /// what the inputs hold and the outputs can take.
    fn integrate_step(
        &self,
        net: &Net,
        marking: &mut Marking,
        clock: Clock,
    ) -> Result<FireRecord, FireError> {
        let rate = self.current_rate(marking, clock.time);
        let unit = TransferPlan::build(net, self.transition, 1.0);
        let amount = (rate * clock.dt).min(unit.feasible_scale(net, marking));

        let plan = if amount > EPSILON {
            unit.scaled(amount)
        } else {
            TransferPlan::default()
        };
        plan.apply(net, self.transition, marking)?;
        log::trace!(
            "continuous {} integrated rate={rate} dt={} amount={amount}",
            net.transition(self.transition).name,
            clock.dt
        );
        Ok(FireRecord {
            transition: self.transition,
            consumed: plan.consumed,
            produced: plan.produced,
        })
    }
}

impl Behavior for ContinuousBehavior {
    fn transition(&self) -> TransitionId {
        self.transition
    }

    fn kind(&self) -> TransitionKindTag {
        TransitionKindTag::Continuous
    }

    fn can_fire(&self, net: &Net, marking: &Marking, clock: Clock) -> Enablement {
        let rate = self.current_rate(marking, clock.time);
        if !(rate > 0.0) {
            return Enablement::disabled(format!("rate `{}` is {rate}", self.rate));
        }
        match check_arcs(net, self.transition, marking, clock.time, InputCheck::Continuous)
            .and_then(|()| check_guard(net, self.transition, marking, clock.time))
        {
            Ok(()) => Enablement::enabled(format!("flowing at rate {rate}")),
            Err(reason) => Enablement::disabled(reason),
        }
    }

    fn fire(
        &mut self,
        net: &Net,
        marking: &mut Marking,
        clock: Clock,
    ) -> Result<FireRecord, FireError> {
        let enablement = self.can_fire(net, marking, clock);
        if !enablement.enabled {
            return Err(FireError::NotEnabled {
                transition: net.transition(self.transition).name.clone(),
                reason: enablement.reason,
            });
        }
        self.integrate_step(net, marking, clock)
    }

    fn clone_box(&self) -> Box<dyn Behavior> {
        Box::new(self.clone())
    }
}
