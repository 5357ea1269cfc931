//! Batch studies and the sequential search loop.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cbp_data::{default_config_file, default_study_file, load_predictor_config, load_study_table, ResultStore};
use cbp_engine::{cbp_home, ConflictPolicy, Engine, RunConfig};
use cbp_types::{internal_error, CbpResult, ParameterValue, PredictorConfig, StudyError, StudyTable};
use tracing::{info, warn};
use uuid::Uuid;

use crate::log::{StudyReport, TrialLog, STUDY_REPORT_FILE};
use crate::search::{build_strategy, ParameterSet, SearchSpace, SearchStrategy, StrategyKind};
use crate::trial::{OptimizationConfig, OptimizationStatus, Trial, TrialResult};

/// Outcome of evaluating one configuration on the trace set.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub mpki: f64,
    pub num_traces: usize,
    pub result_dir: PathBuf,
}

/// Something that can turn a predictor configuration into an MPKI.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, config: &PredictorConfig) -> CbpResult<Evaluation>;
}

#[async_trait]
impl Evaluator for Engine {
    async fn evaluate(&self, config: &PredictorConfig) -> CbpResult<Evaluation> {
        let outcome = self.run(config).await?;
        Ok(Evaluation {
            mpki: outcome.mpki,
            num_traces: outcome.num_traces,
            result_dir: outcome.result_dir,
        })
    }
}

// ---------------------------------------------------------------------------
// Extend mode
// ---------------------------------------------------------------------------

/// Compare a stored configuration with the one being studied.
///
/// Every parameter that is not optimized must have the same value in both;
/// the stored values of optimized parameters are returned as a seed point.
/// Returns `None` when the stored config belongs to a different setup.
pub fn match_stored_config(
    config: &PredictorConfig,
    stored: &PredictorConfig,
    optimized: &[String],
) -> Option<ParameterSet> {
    let mut seed = ParameterSet::new();

    for (name, spec) in &config.parameters {
        let stored_spec = stored.get(name)?;
        if stored_spec.type_name() != spec.type_name() {
            warn!(
                "Stored parameter {} has type {} instead of {}",
                name,
                stored_spec.type_name(),
                spec.type_name()
            );
            return None;
        }

        let stored_value = stored_spec.value();
        if optimized.iter().any(|o| o == name) {
            seed.insert(name.clone(), stored_value);
        } else if stored_value != spec.value() {
            return None;
        }
    }

    Some(seed)
}

/// Feed stored results of the same predictor version into `strategy`.
fn seed_from_store(
    store: &ResultStore,
    base: &PredictorConfig,
    space: &SearchSpace,
    strategy: &mut dyn SearchStrategy,
    status: &mut OptimizationStatus,
) -> CbpResult<()> {
    info!("Loading previous results...");
    let names = space.names();
    let mut lowest: Option<f64> = None;

    for stored in store.stored_results(base)? {
        let Some(seed) = match_stored_config(base, &stored.config, &names) else {
            continue;
        };

        let mpki = stored.reproduction.mpki;
        strategy.report(&seed, mpki);
        status.update_best(&TrialResult {
            trial_id: Uuid::new_v4(),
            objective: mpki,
            num_traces: stored.reproduction.num_traces,
            parameters: seed,
            result_dir: stored.dir,
        });
        status.seeded += 1;
        lowest = Some(lowest.map_or(mpki, |l| l.min(mpki)));
    }

    info!("Number of loaded results: {}", status.seeded);
    match lowest {
        Some(mpki) => info!("Lowest MPKI: {:.3}", mpki),
        None => info!("Lowest MPKI: none"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Search loop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best: TrialResult,
    pub status: OptimizationStatus,
    pub trials: Vec<Trial>,
    pub log_path: PathBuf,
}

/// Run `config.max_trials` sequential evaluations proposed by the configured
/// strategy, starting from `base`.
pub async fn run_search<E: Evaluator + ?Sized>(
    evaluator: &E,
    base: &PredictorConfig,
    config: OptimizationConfig,
    store: &ResultStore,
    log_dir: &Path,
) -> CbpResult<SearchOutcome> {
    let space = config.search_space.clone();
    let mut strategy = build_strategy(
        config.strategy,
        space.clone(),
        config.seed,
        config.exploration_weight,
        config.grid_steps,
    )?;
    info!(
        "Optimizing {} over {:?} with {} search, {} iterations",
        config.name,
        space.names(),
        strategy.name(),
        config.max_trials
    );

    let mut status = OptimizationStatus::new(config);
    status.mark_running();

    if status.config.extend {
        seed_from_store(store, base, &space, strategy.as_mut(), &mut status)?;
    }

    let mut log = TrialLog::create(log_dir, &space.names())?;
    let mut trials = Vec::new();

    for i in 0..status.config.max_trials {
        let Some(params) = strategy.suggest(1).into_iter().next() else {
            info!("Search space exhausted after {} trials", i);
            break;
        };

        let mut trial = Trial::new(status.id, i, params.clone());
        trial.mark_running();

        let mut candidate = base.clone();
        params.apply_to(&mut candidate)?;

        let evaluation = evaluator.evaluate(&candidate).await?;

        info!(
            "Trial: {}    MPKI: {:.3}    Number of traces: {}",
            i, evaluation.mpki, evaluation.num_traces
        );
        log.append(i, evaluation.mpki, &params, &evaluation.result_dir)?;

        let result = TrialResult {
            trial_id: trial.id,
            objective: evaluation.mpki,
            num_traces: evaluation.num_traces,
            parameters: params.clone(),
            result_dir: evaluation.result_dir,
        };
        strategy.report(&params, evaluation.mpki);
        status.update_best(&result);
        status.trials_completed += 1;
        trial.mark_completed(result);
        trials.push(trial);
    }

    status.mark_completed();
    let best = status
        .best_trial
        .clone()
        .ok_or_else(|| internal_error!("search for {} finished without any result", status.config.name))?;

    info!(
        "Optimal parameters: {} with MPKI {:.3}",
        best.parameters
            .iter()
            .map(|(n, v)| format!("{n}={v}"))
            .collect::<Vec<_>>()
            .join(", "),
        best.objective
    );

    Ok(SearchOutcome {
        best,
        status,
        trials,
        log_path: log.path().to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Study driver
// ---------------------------------------------------------------------------

/// Settings for a batch study.
#[derive(Debug, Clone)]
pub struct StudyConfig {
    pub table_path: PathBuf,
    pub predictor_folder: PathBuf,
    /// Base run settings; the result root is the default for rows without one.
    pub run: RunConfig,
    pub strategy: StrategyKind,
    pub seed: Option<u64>,
    pub extend: bool,
    pub exploration_weight: f64,
    pub grid_steps: usize,
    pub report_path: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for StudyConfig {
    fn default() -> Self {
        let run = RunConfig::from_home(&cbp_home());
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            table_path: default_study_file(&run.predictor_folder),
            predictor_folder: run.predictor_folder.clone(),
            run,
            strategy: StrategyKind::default(),
            seed: None,
            extend: false,
            exploration_weight: 0.3,
            grid_steps: 5,
            report_path: cwd.join(STUDY_REPORT_FILE),
            log_dir: cwd,
        }
    }
}

impl StudyConfig {
    pub fn with_run_config(mut self, run: RunConfig) -> Self {
        self.predictor_folder = run.predictor_folder.clone();
        self.table_path = default_study_file(&self.predictor_folder);
        self.run = run;
        self
    }

    pub fn with_table(mut self, path: impl Into<PathBuf>) -> Self {
        self.table_path = path.into();
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_extend(mut self, extend: bool) -> Self {
        self.extend = extend;
        self
    }

    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = path.into();
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }
}

/// Summary of one finished study row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowOutcome {
    pub index: usize,
    pub mpki: f64,
    pub num_traces: usize,
    pub result_dir: PathBuf,
    /// Trial log of the search, for rows with optimized parameters
    pub trial_log: Option<PathBuf>,
}

/// Runs every row of a study table in order.
pub struct StudyDriver {
    config: StudyConfig,
}

impl StudyDriver {
    pub fn new(config: StudyConfig) -> Self {
        Self { config }
    }

    /// Run the study with the real compile/simulate engine.
    pub async fn run(&self) -> CbpResult<Vec<RowOutcome>> {
        self.run_with(|run| Engine::new(run.clone())).await
    }

    /// Run the study, building one evaluator per row from its run settings.
    pub async fn run_with<E, F>(&self, make_evaluator: F) -> CbpResult<Vec<RowOutcome>>
    where
        E: Evaluator,
        F: Fn(&RunConfig) -> E,
    {
        let table = load_study_table(&self.config.table_path)?;
        let mut report = StudyReport::create(&self.config.report_path, &table.header)?;
        info!(
            "Study {} has {} rows, reporting to {}",
            self.config.table_path.display(),
            table.rows.len(),
            report.path().display()
        );

        let mut outcomes = Vec::with_capacity(table.rows.len());
        for row in &table.rows {
            let config_file = row
                .config_file
                .clone()
                .unwrap_or_else(|| default_config_file(&self.config.predictor_folder));
            let mut config = load_predictor_config(&config_file)?;
            for name in table.parameter_columns().iter().filter(|n| !n.is_empty()) {
                config.require(name)?;
            }
            row.apply_overrides(&mut config)?;

            let result_root = row
                .result_dir
                .clone()
                .unwrap_or_else(|| self.config.run.result_root.clone());
            let run = self
                .config
                .run
                .clone()
                .with_result_root(&result_root)
                .with_conflict_policy(ConflictPolicy::Reuse);
            let evaluator = make_evaluator(&run);

            let targets = row.params_to_optimize();
            let (outcome, resolved) = if targets.is_empty() {
                info!("Row {}: evaluating {}", row.index, config_file.display());
                let evaluation = evaluator.evaluate(&config).await?;
                let outcome = RowOutcome {
                    index: row.index,
                    mpki: evaluation.mpki,
                    num_traces: evaluation.num_traces,
                    result_dir: evaluation.result_dir,
                    trial_log: None,
                };
                (outcome, config)
            } else {
                if row.iterations == 0 {
                    return Err(StudyError::ZeroIterations { row: row.index }.into());
                }
                info!("Row {}: optimizing {:?}", row.index, targets);

                let space = SearchSpace::from_config(&config, &targets)?;
                let opt = OptimizationConfig::new(config.name.clone(), space, self.config.strategy)
                    .with_max_trials(row.iterations)
                    .with_seed(self.config.seed)
                    .with_extend(self.config.extend)
                    .with_exploration_weight(self.config.exploration_weight)
                    .with_grid_steps(self.config.grid_steps);

                let store = ResultStore::new(&result_root);
                let search = run_search(&evaluator, &config, opt, &store, &self.config.log_dir).await?;

                let mut resolved = config;
                search.best.parameters.apply_to(&mut resolved)?;
                let outcome = RowOutcome {
                    index: row.index,
                    mpki: search.best.objective,
                    num_traces: search.best.num_traces,
                    result_dir: search.best.result_dir.clone(),
                    trial_log: Some(search.log_path),
                };
                (outcome, resolved)
            };

            report.append(&report_row(&table, row.iterations, &config_file, &outcome, &resolved))?;
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}

fn report_row(
    table: &StudyTable,
    iterations: usize,
    config_file: &Path,
    outcome: &RowOutcome,
    resolved: &PredictorConfig,
) -> Vec<String> {
    let mut row = vec![
        outcome.index.to_string(),
        outcome.mpki.to_string(),
        config_file.display().to_string(),
        outcome.result_dir.display().to_string(),
        iterations.to_string(),
    ];
    row.extend(table.parameter_columns().iter().map(|name| {
        resolved
            .value_of(name)
            .as_ref()
            .map(ParameterValue::to_string)
            .unwrap_or_default()
    }));
    row
}
