//! Logical concurrency: which enabled transitions may fire together, and
//! how a chosen set is committed atomically.
pub mod executor;
pub mod locality;
pub mod maximal;

pub use executor::{
    AtomicStepExecutor, ExecutionState, SelectionStrategy, StepFailure, StepOutcome,
};
pub use locality::{conflicts, ConflictGraph, Locality};
pub use maximal::{ConcurrentSet, MaximalSetFinder};
