//! Orchestration of one predictor run: memo check, compile, simulate,
//! aggregate and persist.

use std::path::{Path, PathBuf};

use cbp_data::ResultStore;
use cbp_types::{CbpResult, ConfigHashes, PredictorConfig, Reproduction, RunError, MPKI_METRIC};
use tracing::{info, warn};

use crate::aggregate::{merge_trace_outputs, summarize, Summary};
use crate::compiler::compile_predictor;
use crate::config::{ConflictPolicy, RunConfig};
use crate::interrupt::{ctrl_c_source, InterruptScope, SignalSource};
use crate::runner::TraceRunner;

/// Result of a completed (or reused) run
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub mpki: f64,
    pub num_traces: usize,
    pub result_dir: PathBuf,
    pub hashes: ConfigHashes,
    /// True when a stored result was returned without simulating
    pub reused: bool,
}

/// Runs predictor configurations against the trace set described by a [`RunConfig`].
pub struct Engine {
    config: RunConfig,
    store: ResultStore,
    signal: SignalSource,
}

impl Engine {
    pub fn new(config: RunConfig) -> Self {
        Self {
            store: ResultStore::new(&config.result_root),
            config,
            signal: ctrl_c_source(),
        }
    }

    /// Replace the interrupt listener used while a run is in progress.
    pub fn with_signal_source(mut self, signal: SignalSource) -> Self {
        self.signal = signal;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub async fn run(&self, predictor: &PredictorConfig) -> CbpResult<RunOutcome> {
        let hashes = ConfigHashes::of(predictor);
        let result_dir = self.store.result_dir(predictor, &hashes);

        if result_dir.exists() {
            if let Some(outcome) = self.check_memo(&hashes, &result_dir)? {
                self.report(predictor, &outcome);
                return Ok(outcome);
            }
        }

        info!(
            "Running predictor {} version {} configuration {} ...",
            predictor.name, predictor.version, hashes.config_hash
        );

        let scope = InterruptScope::new(&result_dir, (self.signal)());
        let summary = scope
            .run(self.execute(predictor, &hashes, &result_dir))
            .await?;

        let outcome = RunOutcome {
            mpki: summary.mean,
            num_traces: summary.count,
            result_dir,
            hashes,
            reused: false,
        };
        self.report(predictor, &outcome);
        Ok(outcome)
    }

    /// Decide what to do with an existing result directory. `Some` means the
    /// stored result is reused; `None` means the directory was cleared and the
    /// run should proceed.
    fn check_memo(&self, hashes: &ConfigHashes, result_dir: &Path) -> CbpResult<Option<RunOutcome>> {
        let stored = match ResultStore::read_reproduction(result_dir) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Unreadable result record in {}: {}", result_dir.display(), e);
                None
            }
        };

        match (self.config.conflict, stored) {
            (ConflictPolicy::Abort, stored) => Err(RunError::Conflict {
                config_hash: hashes.config_hash.clone(),
                result_dir: result_dir.to_path_buf(),
                mpki: stored.map(|r| r.mpki),
            }
            .into()),
            (ConflictPolicy::Reuse, Some(stored)) => Ok(Some(RunOutcome {
                mpki: stored.mpki,
                num_traces: stored.num_traces,
                result_dir: result_dir.to_path_buf(),
                hashes: hashes.clone(),
                reused: true,
            })),
            (ConflictPolicy::Reuse, None) => {
                warn!(
                    "Incomplete result in {}, simulating again",
                    result_dir.display()
                );
                std::fs::remove_dir_all(result_dir)?;
                Ok(None)
            }
            (ConflictPolicy::Overwrite, _) => {
                info!("Overwriting results in {}", result_dir.display());
                std::fs::remove_dir_all(result_dir)?;
                Ok(None)
            }
        }
    }

    async fn execute(
        &self,
        predictor: &PredictorConfig,
        hashes: &ConfigHashes,
        result_dir: &Path,
    ) -> CbpResult<Summary> {
        compile_predictor(predictor, &self.config).await?;

        TraceRunner::new(&self.config.simulator, self.config.num_workers)
            .with_progress(self.config.show_progress)
            .run(&self.config.trace_dir, result_dir)
            .await?;

        let merged = merge_trace_outputs(result_dir).await?;
        let summary = summarize(&merged, MPKI_METRIC, result_dir)?;

        let reproduction = Reproduction::new(hashes, summary.mean, summary.count);
        ResultStore::write_record(result_dir, predictor, &reproduction)?;
        Ok(summary)
    }

    fn report(&self, predictor: &PredictorConfig, outcome: &RunOutcome) {
        info!(
            "MPKI for {} version {} configuration {} is {:.3}",
            predictor.name, predictor.version, outcome.hashes.config_hash, outcome.mpki
        );
    }
}
