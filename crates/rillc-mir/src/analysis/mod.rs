//! Analysis scratch used by the optimiser: CFG edges and local liveness.
//!
//! Everything here is recomputed per pass invocation; nothing is cached
//! across mutations of the function.

pub mod cfg;
pub mod liveness;

pub use cfg::ControlFlowGraph;
pub use liveness::{analyze_liveness, LivenessAnalysis};
