use crate::behavior::arcs::{check_arcs, check_guard, InputCheck};
use crate::behavior::{fire_discrete, Behavior, Clock, Enablement, FireError, FireRecord};
use crate::net::{Marking, Net, TransitionId, TransitionKindTag};

/// Zero-delay transition: fires as soon as its arcs and guard allow.
#[derive(Debug, Clone)]
pub struct ImmediateBehavior {
    transition: TransitionId,
}

impl ImmediateBehavior {
    pub fn new(transition: TransitionId) -> Self {
        Self { transition }
    }
}

impl Behavior for ImmediateBehavior {
    fn transition(&self) -> TransitionId {
        self.transition
    }

    fn kind(&self) -> TransitionKindTag {
        TransitionKindTag::Immediate
    }

    fn can_fire(&self, net: &Net, marking: &Marking, clock: Clock) -> Enablement {
        let discrete = InputCheck::Discrete { multiplier: 1.0 };
        match check_arcs(net, self.transition, marking, clock.time, discrete)
            .and_then(|()| check_guard(net, self.transition, marking, clock.time))
        {
            Ok(()) if net.transition(self.transition).is_source => {
                Enablement::enabled("source transition")
            }
            Ok(()) => Enablement::enabled("all input arcs satisfied"),
            Err(reason) => Enablement::disabled(reason),
        }
    }

    fn fire(
        &mut self,
        net: &Net,
        marking: &mut Marking,
        clock: Clock,
    ) -> Result<FireRecord, FireError> {
        fire_discrete(self, net, marking, clock, 1.0)
    }

    fn clone_box(&self) -> Box<dyn Behavior> {
        Box::new(self.clone())
    }
}
