//! # Hybrid Petri net object model
//!
//! A net is a bipartite graph of places `P` and transitions `T`. Each arc
//! joins exactly one place and one transition and carries a `weight`, an
//! optional `threshold` and a kind (normal, inhibitor, test). For an input arc
//! `(p, t)` under marking `M`:
//!
//! * normal: `M[p] ≥ req` where `req = threshold` when set, else `weight`;
//!   firing removes `weight` (never the threshold);
//! * inhibitor: `M[p] < req`; never consumes;
//! * test: `M[p] > 0` (and `≥ threshold` when set); never consumes.
//!
//! Transitions come in four kinds (immediate, timed, stochastic, continuous)
//! and may be flagged as source (no consumption) and/or sink (no production).
//!
//! ```rust
//! use hybrid_pn::net::*;
//!
//! let mut builder = NetBuilder::new();
//! builder.place("p0", 1.0).place("p1", 0.0);
//! builder.transition(Transition::immediate("t0"));
//! builder.input("p0", "t0", 1.0).output("t0", "p1", 1.0);
//!
//! let net = builder.build().unwrap();
//! let t0 = net.transition_id("t0").unwrap();
//! assert_eq!(net.inputs(t0).count(), 1);
//! assert_eq!(net.initial_marking().total(), 1.0);
//! ```

pub mod builder;
pub mod core;
pub mod expr;
pub mod ids;
pub mod index_vec;
pub mod io;
pub mod structure;

pub use builder::{ArcSpec, ModelError, NetBuilder};
pub use self::core::{DiagnosticReport, Net};
pub use expr::{ExprError, Expression};
pub use ids::{PlaceId, TransitionId};
pub use index_vec::{Idx, IndexVec};
pub use io::{read_net, IoError, NetDocument};
pub use structure::{
    Arc, ArcDirection, ArcKind, Marking, Place, Transition, TransitionKind, TransitionKindTag,
    Weight, EPSILON,
};
