//! # cbp-optimizer
//!
//! Parameter search and batch studies for CBP predictors.
//!
//! Provides search spaces built from predictor configurations, search
//! strategies (grid, random, Bayesian), trial tracking, the sequential search
//! loop with its trial log, and the study driver that runs a study table row
//! by row.

mod log;
mod search;
mod study;
mod trial;

pub use log::{StudyReport, TrialLog, STUDY_REPORT_FILE};
pub use search::{
    build_strategy, BayesianSearch, GridSearch, ParameterDef, ParameterKind, ParameterSet,
    RandomSearch, SearchSpace, SearchStrategy, StrategyKind,
};
pub use study::{
    match_stored_config, run_search, Evaluation, Evaluator, RowOutcome, SearchOutcome,
    StudyConfig, StudyDriver,
};
pub use trial::{
    OptimizationConfig, OptimizationId, OptimizationState,
    OptimizationStatus, Trial, TrialResult, TrialStatus,
};
