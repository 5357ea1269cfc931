pub mod aggregate;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod interrupt;
pub mod runner;

pub use aggregate::{merge_trace_outputs, summarize, summarize_file, Summary};
pub use compiler::compile_predictor;
pub use config::{cbp_home, BuildCommand, ConflictPolicy, RunConfig};
pub use engine::{Engine, RunOutcome};
pub use interrupt::{ctrl_c_source, no_signal_source, InterruptScope, SignalFuture, SignalSource};
pub use runner::{list_traces, TraceOutcome, TraceRunner};
