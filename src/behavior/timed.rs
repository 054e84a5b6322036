use crate::behavior::arcs::{check_arcs, check_guard, InputCheck};
use crate::behavior::{fire_discrete, Behavior, Clock, Enablement, FireError, FireRecord};
use crate::net::{Marking, Net, TransitionId, TransitionKindTag, EPSILON};

/// Which part of the timing window a firing happens in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedPath {
    /// `earliest <= elapsed <= latest`.
    Window,
    /// The clock jumped past `latest` within one step; the transition fires at
    /// the boundary.
    Boundary,
}

/// Transition that must stay enabled for a duration in `[earliest, latest]`
/// before it may fire.
#[derive(Debug, Clone)]
pub struct TimedBehavior {
    transition: TransitionId,
    earliest: f64,
    latest: f64,
    enabled_since: Option<f64>,
}

impl TimedBehavior {
    pub fn new(transition: TransitionId, earliest: f64, latest: f64) -> Self {
        Self {
            transition,
            earliest,
            latest,
            enabled_since: None,
        }
    }

    pub fn enabled_since(&self) -> Option<f64> {
        self.enabled_since
    }

    fn structural(&self, net: &Net, marking: &Marking, time: f64) -> Result<(), String> {
        let discrete = InputCheck::Discrete { multiplier: 1.0 };
        check_arcs(net, self.transition, marking, time, discrete)
            .and_then(|()| check_guard(net, self.transition, marking, time))
    }

    /// `None` while the window has not opened yet.
    pub fn path_at(&self, time: f64) -> Option<TimedPath> {
        let elapsed = time - self.enabled_since?;
        if elapsed + EPSILON < self.earliest {
            None
        } else if elapsed <= self.latest + EPSILON {
            Some(TimedPath::Window)
        } else {
            Some(TimedPath::Boundary)
        }
    }
}

impl Behavior for TimedBehavior {
    fn transition(&self) -> TransitionId {
        self.transition
    }

    fn kind(&self) -> TransitionKindTag {
        TransitionKindTag::Timed
    }

    fn can_fire(&self, net: &Net, marking: &Marking, clock: Clock) -> Enablement {
        if let Err(reason) = self.structural(net, marking, clock.time) {
            return Enablement::disabled(reason);
        }
        let Some(since) = self.enabled_since else {
            return Enablement::disabled("enablement clock not started");
        };
        let elapsed = clock.time - since;
        match self.path_at(clock.time) {
            None => Enablement::disabled(format!(
                "waiting: enabled for {elapsed}, window opens at {}",
                self.earliest
            )),
            Some(TimedPath::Window) => Enablement::enabled(format!(
                "in window [{}, {}] after {elapsed}",
                self.earliest, self.latest
            )),
            Some(TimedPath::Boundary) => Enablement::enabled(format!(
                "window closed at {}; firing at boundary",
                self.latest
            )),
        }
    }

    fn fire(
        &mut self,
        net: &Net,
        marking: &mut Marking,
        clock: Clock,
    ) -> Result<FireRecord, FireError> {
        let path = self.path_at(clock.time);
        let record = fire_discrete(self, net, marking, clock, 1.0)?;
        log::debug!(
            "timed {} fired via {:?} at t={}",
            net.transition(self.transition).name,
            path,
            clock.time
        );
        self.enabled_since = None;
        Ok(record)
    }

    fn update_enablement(&mut self, net: &Net, marking: &Marking, clock: Clock) {
        match self.structural(net, marking, clock.time) {
            Ok(()) => {
                self.enabled_since.get_or_insert(clock.time);
            }
            Err(_) => self.enabled_since = None,
        }
    }

    fn reset(&mut self) {
        self.enabled_since = None;
    }

    fn clone_box(&self) -> Box<dyn Behavior> {
        Box::new(self.clone())
    }
}
