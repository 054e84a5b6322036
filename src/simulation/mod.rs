//! Simulation controller: per-step scheduling over the behaviors and the
//! atomic executor, plus listeners and configuration.
pub mod config;
pub mod controller;
pub mod listener;

pub use config::SimulationConfig;
pub use controller::{Simulation, StepError, StepResult};
pub use listener::{DataCollector, Sample, StepListener, Trace};
