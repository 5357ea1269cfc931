//! Parallel simulator dispatch over a trace directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use cbp_data::RESULT_FILE;
use cbp_types::{internal_error, CbpResult, RunError};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Outcome of one simulator invocation
#[derive(Debug, Clone, PartialEq)]
pub struct TraceOutcome {
    pub trace: PathBuf,
    pub output: PathBuf,
    pub success: bool,
}

/// Every regular file directly inside `trace_dir` (symlinks followed), sorted
/// by name.
pub fn list_traces(trace_dir: &Path) -> CbpResult<Vec<PathBuf>> {
    let mut traces: Vec<PathBuf> = std::fs::read_dir(trace_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    traces.sort();
    Ok(traces)
}

/// Runs the simulator once per trace with a bounded number of live processes.
#[derive(Debug, Clone)]
pub struct TraceRunner {
    simulator: PathBuf,
    workers: usize,
    show_progress: bool,
}

impl TraceRunner {
    pub fn new(simulator: impl Into<PathBuf>, workers: usize) -> Self {
        Self {
            simulator: simulator.into(),
            workers: workers.max(1),
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Simulate every trace in `trace_dir`, writing `<trace file name>.json`
    /// files into `result_dir`.
    ///
    /// Dropping the returned future kills every running simulator.
    pub async fn run(&self, trace_dir: &Path, result_dir: &Path) -> CbpResult<Vec<TraceOutcome>> {
        let traces = list_traces(trace_dir)?;
        if traces.is_empty() {
            return Err(RunError::NoTraces {
                trace_dir: trace_dir.to_path_buf(),
            }
            .into());
        }

        std::fs::create_dir_all(result_dir)?;
        info!(
            "Simulating {} traces with {} workers",
            traces.len(),
            self.workers
        );

        let progress = self.progress_bar(traces.len() as u64);
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        let names = output_names(&traces);
        for (trace, name) in traces.into_iter().zip(names) {
            let semaphore = semaphore.clone();
            let simulator = self.simulator.clone();
            let output = result_dir.join(name);

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| internal_error!("worker pool closed: {}", e))?;
                simulate_trace(&simulator, trace, output).await
            });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| internal_error!("simulation task failed: {}", e))??;
            progress.inc(1);
            outcomes.push(outcome);
        }
        progress.finish_and_clear();

        let failed = outcomes.iter().filter(|o| !o.success).count();
        if failed > 0 {
            warn!("{} of {} simulations exited with an error", failed, outcomes.len());
        }
        Ok(outcomes)
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        if let Ok(style) =
            ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} traces")
        {
            bar.set_style(style);
        }
        bar
    }
}

/// `<trace file name>.json` per trace. A name that would clash with the
/// merged result file gets a numeric infix instead.
fn output_names(traces: &[PathBuf]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::from([RESULT_FILE.to_string()]);
    traces
        .iter()
        .map(|trace| {
            let stem = trace
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut name = format!("{stem}.json");
            let mut n = 1;
            while !used.insert(name.clone()) {
                name = format!("{stem}.{n}.json");
                n += 1;
            }
            if n > 1 {
                warn!("Output of trace {} is written to {}", trace.display(), name);
            }
            name
        })
        .collect()
}

async fn simulate_trace(simulator: &Path, trace: PathBuf, output: PathBuf) -> CbpResult<TraceOutcome> {
    let stdout = std::fs::File::create(&output)?;
    debug!("{} {} > {}", simulator.display(), trace.display(), output.display());

    let status = Command::new(simulator)
        .arg(&trace)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| RunError::Simulator {
            path: simulator.to_path_buf(),
            message: e.to_string(),
        })?;

    if !status.success() {
        warn!("Simulator exited with {} on trace {}", status, trace.display());
    }

    Ok(TraceOutcome {
        trace,
        output,
        success: status.success(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbp_types::CbpError;
    use tempfile::TempDir;

    #[test]
    fn test_list_traces_skips_directories() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.bt9.gz"), b"").unwrap();
        std::fs::write(tmp.path().join("a.bt9.gz"), b"").unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();

        let traces = list_traces(tmp.path()).unwrap();
        let names: Vec<_> = traces
            .iter()
            .map(|t| t.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.bt9.gz", "b.bt9.gz"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_list_traces_follows_symlinks() {
        let tmp = TempDir::new().unwrap();
        let store = tmp.path().join("store");
        let traces = tmp.path().join("traces");
        std::fs::create_dir(&store).unwrap();
        std::fs::create_dir(&traces).unwrap();
        std::fs::write(store.join("t1.bt9.gz"), b"").unwrap();
        std::os::unix::fs::symlink(store.join("t1.bt9.gz"), traces.join("t1.bt9.gz")).unwrap();
        std::os::unix::fs::symlink(&store, traces.join("linked-dir")).unwrap();
        std::os::unix::fs::symlink(store.join("missing"), traces.join("dangling")).unwrap();

        let found = list_traces(&traces).unwrap();
        assert_eq!(found, vec![traces.join("t1.bt9.gz")]);
    }

    #[test]
    fn test_output_names_avoid_result_file() {
        let traces = vec![PathBuf::from("/t/a.gz"), PathBuf::from("/t/result")];
        let names = output_names(&traces);
        assert_eq!(names, vec!["a.gz.json".to_string(), "result.1.json".to_string()]);
        assert!(!names.iter().any(|n| n == RESULT_FILE));
    }

    #[tokio::test]
    async fn test_empty_trace_dir() {
        let traces = TempDir::new().unwrap();
        let results = TempDir::new().unwrap();
        let runner = TraceRunner::new("/bin/true", 2).with_progress(false);

        let err = runner.run(traces.path(), results.path()).await.unwrap_err();
        assert!(matches!(err, CbpError::Run(RunError::NoTraces { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_simulator_per_trace() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let trace_dir = tmp.path().join("traces");
        let result_dir = tmp.path().join("results");
        std::fs::create_dir(&trace_dir).unwrap();
        for name in ["t1.gz", "t2.gz", "t3.gz"] {
            std::fs::write(trace_dir.join(name), b"").unwrap();
        }

        let sim = tmp.path().join("sim.sh");
        std::fs::write(
            &sim,
            "#!/bin/sh\nname=$(basename \"$1\")\nprintf '{\"%s\": {\"MISPRED_PER_1K_INST\": 1.0}}' \"$name\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&sim, std::fs::Permissions::from_mode(0o755)).unwrap();

        let runner = TraceRunner::new(&sim, 2).with_progress(false);
        let outcomes = runner.run(&trace_dir, &result_dir).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.success));
        let text = std::fs::read_to_string(result_dir.join("t2.gz.json")).unwrap();
        assert!(text.contains("t2.gz"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_trace_named_result_survives_merge() {
        use crate::aggregate::merge_trace_outputs_blocking;
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let trace_dir = tmp.path().join("traces");
        let result_dir = tmp.path().join("results");
        std::fs::create_dir(&trace_dir).unwrap();
        for name in ["result", "t1.gz"] {
            std::fs::write(trace_dir.join(name), b"").unwrap();
        }

        let sim = tmp.path().join("sim.sh");
        std::fs::write(
            &sim,
            "#!/bin/sh\nname=$(basename \"$1\")\nprintf '{\"%s\": {\"MISPRED_PER_1K_INST\": 2.0}}' \"$name\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&sim, std::fs::Permissions::from_mode(0o755)).unwrap();

        TraceRunner::new(&sim, 2)
            .with_progress(false)
            .run(&trace_dir, &result_dir)
            .await
            .unwrap();
        let merged = merge_trace_outputs_blocking(&result_dir).unwrap();

        assert_eq!(merged.len(), 2);
        assert!(merged.contains_key("result"));
        assert!(merged.contains_key("t1.gz"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_simulator_is_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let trace_dir = tmp.path().join("traces");
        std::fs::create_dir(&trace_dir).unwrap();
        std::fs::write(trace_dir.join("t1.gz"), b"").unwrap();

        let runner = TraceRunner::new("/bin/false", 1).with_progress(false);
        let outcomes = runner.run(&trace_dir, &tmp.path().join("out")).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
    }

    #[tokio::test]
    async fn test_missing_simulator_is_reported() {
        let tmp = TempDir::new().unwrap();
        let trace_dir = tmp.path().join("traces");
        std::fs::create_dir(&trace_dir).unwrap();
        std::fs::write(trace_dir.join("t1.gz"), b"").unwrap();

        let runner = TraceRunner::new(tmp.path().join("no-such-sim"), 1).with_progress(false);
        let err = runner.run(&trace_dir, &tmp.path().join("out")).await.unwrap_err();
        assert!(matches!(err, CbpError::Run(RunError::Simulator { .. })));
    }
}
