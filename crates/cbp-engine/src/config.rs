use std::path::{Path, PathBuf};

/// Environment variable naming the root of a CBP checkout.
pub const CBP_HOME_ENV: &str = "CBP_HOME";

/// What to do when the result directory for a configuration already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Fail with a conflict error naming the hash and stored MPKI
    #[default]
    Abort,
    /// Reuse the stored result without simulating
    Reuse,
    /// Remove the stored result and simulate again
    Overwrite,
}

impl ConflictPolicy {
    /// Map the `--force` / `--silence` flags to a policy.
    pub fn from_flags(force: bool, silence: bool) -> Self {
        match (force, silence) {
            (true, _) => Self::Overwrite,
            (false, true) => Self::Reuse,
            (false, false) => Self::Abort,
        }
    }
}

/// External build step, run without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl BuildCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `task -d <sim_dir>`
    pub fn task(sim_dir: &Path) -> Self {
        Self::new("task", vec!["-d".to_string(), sim_dir.display().to_string()])
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Settings for one compile/simulate/aggregate run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub trace_dir: PathBuf,
    pub result_root: PathBuf,
    pub predictor_folder: PathBuf,
    /// Directory receiving the generated headers
    pub build_dir: PathBuf,
    pub simulator: PathBuf,
    pub build: BuildCommand,
    pub conflict: ConflictPolicy,
    pub user_stats: bool,
    pub num_workers: usize,
    pub forward_build_output: bool,
    pub show_progress: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from_home(&cbp_home())
    }
}

impl RunConfig {
    /// Default layout of a CBP checkout rooted at `home`.
    pub fn from_home(home: &Path) -> Self {
        let sim_dir = home.join("sim");
        let build_dir = sim_dir.join("build");
        Self {
            trace_dir: home
                .join("traces")
                .join("evaluationTraces.Final")
                .join("evaluationTraces"),
            result_root: home.join("results"),
            predictor_folder: sim_dir.join("cbp-predictors").join("gshare"),
            simulator: build_dir.join("predictor"),
            build: BuildCommand::task(&sim_dir),
            build_dir,
            conflict: ConflictPolicy::default(),
            user_stats: false,
            num_workers: default_workers(),
            forward_build_output: false,
            show_progress: true,
        }
    }

    pub fn with_trace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trace_dir = dir.into();
        self
    }

    pub fn with_result_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.result_root = dir.into();
        self
    }

    pub fn with_predictor_folder(mut self, dir: impl Into<PathBuf>) -> Self {
        self.predictor_folder = dir.into();
        self
    }

    /// Point at a simulator checkout: headers go to `<sim_dir>/build`, the
    /// binary is `<sim_dir>/build/predictor` and the build is `task -d <sim_dir>`.
    pub fn with_sim_dir(mut self, sim_dir: &Path) -> Self {
        self.build_dir = sim_dir.join("build");
        self.simulator = self.build_dir.join("predictor");
        self.build = BuildCommand::task(sim_dir);
        self
    }

    pub fn with_build_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.build_dir = dir.into();
        self
    }

    pub fn with_simulator(mut self, path: impl Into<PathBuf>) -> Self {
        self.simulator = path.into();
        self
    }

    pub fn with_build_command(mut self, build: BuildCommand) -> Self {
        self.build = build;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict = policy;
        self
    }

    pub fn with_user_stats(mut self, enabled: bool) -> Self {
        self.user_stats = enabled;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.num_workers = workers.max(1);
        self
    }

    pub fn with_build_output(mut self, forward: bool) -> Self {
        self.forward_build_output = forward;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }
}

/// Root of the CBP checkout: `$CBP_HOME`, or the current directory.
pub fn cbp_home() -> PathBuf {
    std::env::var_os(CBP_HOME_ENV)
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_flags() {
        assert_eq!(ConflictPolicy::from_flags(false, false), ConflictPolicy::Abort);
        assert_eq!(ConflictPolicy::from_flags(false, true), ConflictPolicy::Reuse);
        assert_eq!(ConflictPolicy::from_flags(true, false), ConflictPolicy::Overwrite);
    }

    #[test]
    fn test_home_layout() {
        let config = RunConfig::from_home(Path::new("/cbp"));
        assert_eq!(config.result_root, PathBuf::from("/cbp/results"));
        assert_eq!(config.build_dir, PathBuf::from("/cbp/sim/build"));
        assert_eq!(config.simulator, PathBuf::from("/cbp/sim/build/predictor"));
        assert_eq!(
            config.predictor_folder,
            PathBuf::from("/cbp/sim/cbp-predictors/gshare")
        );
        assert_eq!(config.build.display(), "task -d /cbp/sim");
        assert!(config.num_workers >= 1);
    }

    #[test]
    fn test_builders() {
        let config = RunConfig::from_home(Path::new("/cbp"))
            .with_sim_dir(Path::new("/other/sim"))
            .with_workers(0)
            .with_conflict_policy(ConflictPolicy::Reuse);
        assert_eq!(config.simulator, PathBuf::from("/other/sim/build/predictor"));
        assert_eq!(config.num_workers, 1);
        assert_eq!(config.conflict, ConflictPolicy::Reuse);
    }
}
