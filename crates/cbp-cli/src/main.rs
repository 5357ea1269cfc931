//! `cbp`: compile, simulate and tune branch predictors.
//!
//! Subcommands:
//! 1. **run:** build one configuration and simulate it on every trace.
//! 2. **study:** run the rows of a study table, searching over parameters marked `optimize`.
//! 3. **print-results:** compare result directories trace by trace.
//! 4. **howto:** short quickstart.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use cbp_data::{compare_results, default_config_file, load_predictor_config};
use cbp_engine::{ConflictPolicy, Engine, RunConfig};
use cbp_optimizer::{StrategyKind, StudyConfig, StudyDriver};
use cbp_types::{CbpError, MPKI_METRIC};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "cbp",
    version,
    about = "Branch predictor simulation and tuning",
    long_about = "Compile a predictor configuration, run it on every trace, and tune its parameters.\n\nSet CBP_HOME to the root of the CBP checkout to change the default trace, result and simulator locations."
)]
struct Cli {
    /// Increase verbosity (-v debug logs, -vv also shows build output)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run predictor with the given configuration file on all traces
    Run(RunArgs),

    /// Run batch simulations and optimization studies defined in a csv file
    Study(StudyArgs),

    /// Compare per-trace results of one or more result directories
    PrintResults {
        /// Result directories containing result.json
        #[arg(required = true, num_args = 1..)]
        dirs: Vec<PathBuf>,

        /// Metric to compare
        #[arg(short, long, default_value = MPKI_METRIC)]
        metric: String,

        /// Sort traces by the first directory's values
        #[arg(long)]
        sort: bool,
    },

    /// Print a short quickstart
    Howto,
}

#[derive(Args, Debug)]
struct SimulationArgs {
    /// Trace directory
    #[arg(short, long)]
    trace_dir: Option<PathBuf>,

    /// Folder with predictor code
    #[arg(short, long)]
    predictor_folder: Option<PathBuf>,

    /// Simulator checkout (headers go to <sim-dir>/build, built with `task -d <sim-dir>`)
    #[arg(long)]
    sim_dir: Option<PathBuf>,

    /// Simulator executable, if not <sim-dir>/build/predictor
    #[arg(long)]
    simulator: Option<PathBuf>,

    /// Collect predictor defined statistics (defines USER_STATS)
    #[arg(short, long)]
    user_stats: bool,

    /// How many simulator processes to run in parallel
    #[arg(short, long)]
    num_threads: Option<usize>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    sim: SimulationArgs,

    /// Where to create the directory with simulation results
    #[arg(short, long)]
    result_dir: Option<PathBuf>,

    /// Override the .yml configuration file for the predictor
    #[arg(short, long)]
    yml_file: Option<PathBuf>,

    /// Overwrite results that already exist for this configuration
    #[arg(short, long, conflicts_with = "silence")]
    force: bool,

    /// Reuse results that already exist for this configuration
    #[arg(short, long)]
    silence: bool,
}

#[derive(Args, Debug)]
struct StudyArgs {
    #[command(flatten)]
    sim: SimulationArgs,

    /// Study table, default <predictor-folder>/config/study_config.csv
    #[arg(short = 's', long)]
    study_config: Option<PathBuf>,

    /// Seed searches with stored results of the same predictor version
    #[arg(short, long)]
    extend_study: bool,

    /// Search strategy: bayesian, random or grid
    #[arg(long, default_value = "bayesian")]
    strategy: StrategyKind,

    /// Random seed for reproducible searches
    #[arg(long)]
    seed: Option<u64>,

    /// Study report path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Directory for trial logs
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

const HOWTO: &str = "\
Quickstart

  1. Describe your predictor in <predictor>/config/predictor.yml:

       predictor:
         name: gshare
         version: 1
       parameters:
         PHT_SIZE: {type: int, val: 14, min: 10, max: 20}
         HYST:     {type: bool, val: true}

  2. Run it on every trace:

       cbp run -p <predictor>

     Results land in <results>/<name>/<version>/<config hash>/. Running the
     same configuration again fails unless -s (reuse) or -f (overwrite) is given.

  3. Tune it with a study table (<predictor>/config/study_config.csv):

       Config file,Result dir,Vizier iterations,PHT_SIZE,HYST
       ,,0,12,
       ,,30,optimize,optimize

       cbp study -p <predictor>

  4. Compare results:

       cbp print-results <result dir> <result dir> --sort
";

fn init_tracing(verbose: u8) {
    let default_level = if verbose > 0 { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn existing_dir(path: &Path, what: &str) -> Result<PathBuf> {
    std::fs::canonicalize(path).with_context(|| format!("{what} {} is not accessible", path.display()))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn run_config(sim: &SimulationArgs, verbose: u8) -> Result<RunConfig> {
    let mut run = RunConfig::default();
    if let Some(sim_dir) = &sim.sim_dir {
        run = run.with_sim_dir(&existing_dir(sim_dir, "Simulator directory")?);
    }
    if let Some(simulator) = &sim.simulator {
        run = run.with_simulator(absolute(simulator)?);
    }
    if let Some(trace_dir) = &sim.trace_dir {
        run = run.with_trace_dir(existing_dir(trace_dir, "Trace directory")?);
    }
    let predictor_folder = sim.predictor_folder.as_ref().unwrap_or(&run.predictor_folder).clone();
    run = run.with_predictor_folder(existing_dir(&predictor_folder, "Predictor folder")?);
    if let Some(n) = sim.num_threads {
        run = run.with_workers(n);
    }

    Ok(run
        .with_user_stats(sim.user_stats)
        .with_build_output(verbose > 1))
}

async fn cmd_run(args: RunArgs, verbose: u8) -> Result<()> {
    let mut run = run_config(&args.sim, verbose)?
        .with_conflict_policy(ConflictPolicy::from_flags(args.force, args.silence));
    if let Some(result_dir) = &args.result_dir {
        run = run.with_result_root(absolute(result_dir)?);
    }

    let yml_file = args
        .yml_file
        .unwrap_or_else(|| default_config_file(&run.predictor_folder));
    let config = load_predictor_config(&yml_file)?;

    let outcome = Engine::new(run).run(&config).await?;
    println!(
        "MPKI for {} version {} configuration {} is {:.3}",
        config.name, config.version, outcome.hashes.config_hash, outcome.mpki
    );
    println!("Results: {}", outcome.result_dir.display());
    Ok(())
}

async fn cmd_study(args: StudyArgs, verbose: u8) -> Result<()> {
    let run = run_config(&args.sim, verbose)?;
    let mut study = StudyConfig::default()
        .with_run_config(run)
        .with_strategy(args.strategy)
        .with_seed(args.seed)
        .with_extend(args.extend_study);
    if let Some(table) = args.study_config {
        study = study.with_table(table);
    }
    if let Some(report) = args.report {
        study = study.with_report_path(report);
    }
    if let Some(log_dir) = args.log_dir {
        study = study.with_log_dir(log_dir);
    }

    let report_path = study.report_path.clone();
    let outcomes = StudyDriver::new(study).run().await?;
    for outcome in &outcomes {
        println!(
            "Row {}: MPKI {:.3} over {} traces ({})",
            outcome.index,
            outcome.mpki,
            outcome.num_traces,
            outcome.result_dir.display()
        );
    }
    println!("Study report: {}", report_path.display());
    Ok(())
}

fn cmd_print_results(dirs: Vec<PathBuf>, metric: &str, sort: bool) -> Result<()> {
    let mut comparison = compare_results(&dirs, metric)?;
    if sort {
        comparison.sort_by_first();
    }
    cli_table::print_stdout(comparison.to_table()).context("Failed to print results table")?;
    if comparison.bad_comparison {
        warn!("Some traces are missing from some result directories; averages are not comparable");
    }
    Ok(())
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => cmd_run(args, cli.verbose).await,
        Commands::Study(args) => cmd_study(args, cli.verbose).await,
        Commands::PrintResults { dirs, metric, sort } => cmd_print_results(dirs, &metric, sort),
        Commands::Howto => {
            print!("{HOWTO}");
            Ok(())
        }
    }
}

fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<CbpError>()
        .map(CbpError::exit_code)
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Outside a run's interrupt scope Ctrl-C just stops the command. Inside
    // one, the scope reports the interrupt first.
    let result = tokio::select! {
        biased;
        result = dispatch(cli) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted");
            return ExitCode::from(130);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}
