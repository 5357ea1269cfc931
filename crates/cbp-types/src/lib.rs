pub mod config;
pub mod hash;
pub mod study;
pub mod errors;

pub use config::*;
pub use hash::*;
pub use study::*;
pub use errors::*;

/// Metric reported by the simulator for mispredictions per 1000 instructions.
pub const MPKI_METRIC: &str = "MISPRED_PER_1K_INST";
