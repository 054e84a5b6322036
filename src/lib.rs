//! Hybrid Petri net execution engine.
//!
//! * [`net`]: the object model, its builder, expressions and file formats.
//! * [`behavior`]: per-transition semantics for the four transition kinds.
//! * [`concurrency`]: conflict detection, maximal concurrent sets and the
//!   atomic step executor.
//! * [`simulation`]: the controller that drives steps and notifies listeners.
pub mod behavior;
pub mod concurrency;
pub mod net;
pub mod simulation;
