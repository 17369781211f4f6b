//! rowflow - command-line pipeline runner
//!
//! Usage:
//!   rowflow run pipelines/orders.toml --timeout-secs 60
//!   rowflow validate pipelines/orders.toml
//!   rowflow steps

use clap::{Parser, Subcommand};
use rowflow::{
    config::{engine_config_path, EngineConfig, Topology},
    logging,
    pipeline::{Pipeline, PipelineCompiler, RunResult, StepKind, StepRegistry, WaitStatus},
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rowflow")]
#[command(about = "Run threaded row-flow pipelines")]
#[command(version)]
struct Cli {
    /// Engine config file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to daily-rolling files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a topology until every step has finished
    Run {
        topology: PathBuf,

        /// Stop the run if it has not finished after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Override the queue capacity
        #[arg(long)]
        queue_capacity: Option<usize>,

        /// Check every row against the first row's layout
        #[arg(long)]
        safe_mode: bool,

        /// Print the run result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a topology and print its plan statistics
    Validate { topology: PathBuf },
    /// List the built-in step types
    Steps,
}

fn load_engine_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    Ok(match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_or_default(),
    })
}

fn print_summary(result: &RunResult) {
    println!(
        "Pipeline '{}' {:?} in {} ms",
        result.pipeline,
        result.status,
        result.elapsed.as_millis()
    );
    println!(
        "{:<24} {:>4} {:<10} {:>10} {:>10} {:>10}",
        "step", "copy", "outcome", "read", "written", "rejected"
    );
    for step in &result.steps {
        let outcome = step.outcome.unwrap_or(step.state).to_string();
        println!(
            "{:<24} {:>4} {:<10} {:>10} {:>10} {:>10}",
            step.step, step.copy, outcome, step.lines_read, step.lines_written, step.lines_rejected
        );
    }
    for error in &result.errors {
        println!("error: {}.{}: {}", error.step, error.copy, error.message);
    }
}

fn run(
    topology: PathBuf,
    config: EngineConfig,
    timeout: Option<Duration>,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let topology = Topology::load(&topology)?;
    let registry = Arc::new(StepRegistry::with_builtins());
    let mut pipeline = Pipeline::build(&topology, registry, config)?;
    pipeline.start()?;

    if pipeline.wait_until_finished(timeout) == WaitStatus::TimedOut {
        tracing::warn!("Run timed out, stopping");
        pipeline.stop();
        pipeline.wait_until_finished(None);
    }

    let result = pipeline.result();
    if json {
        println!("{}", result.to_json()?);
    } else {
        print_summary(&result);
    }
    Ok(if result.is_successful() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let _guard = match &cli.log_dir {
        Some(dir) => Some(logging::init_with_file(dir, "rowflow.log", logging::DEFAULT_FILTER)?),
        None => {
            logging::init(logging::DEFAULT_FILTER);
            None
        }
    };

    match cli.command {
        Command::Run {
            topology,
            timeout_secs,
            queue_capacity,
            safe_mode,
            json,
        } => {
            let mut config = load_engine_config(cli.config.as_ref())?;
            if let Some(capacity) = queue_capacity {
                config = config.with_queue_capacity(capacity);
            }
            if safe_mode {
                config = config.with_safe_mode(true);
            }
            config.validate()?;
            tracing::info!(
                config = ?cli.config.clone().or_else(engine_config_path),
                queue_capacity = config.queue_capacity,
                "Starting rowflow"
            );
            run(topology, config, timeout_secs.map(Duration::from_secs), json)
        }
        Command::Validate { topology } => {
            let config = load_engine_config(cli.config.as_ref())?;
            let topology = Topology::load(&topology)?;
            let registry = StepRegistry::with_builtins();
            let plan = PipelineCompiler::compile(&topology, &registry, config.queue_capacity)?;
            let stats = &plan.stats;
            println!(
                "Topology '{}' is valid: {} steps, {} copies, {} hops ({} disabled), {} queue-pairs",
                plan.name, stats.steps, stats.copies, stats.hops, stats.disabled_hops, stats.queue_pairs
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Steps => {
            for kind in StepKind::all() {
                println!("{:<14} {:<16} {}", kind.tag(), kind.display_name(), kind.description());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
