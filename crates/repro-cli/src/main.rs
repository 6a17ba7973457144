//! Repro CLI - run formulas and check they reproduce
//!
//! Usage:
//!   repro init [path]           Write a default .repro/config.toml
//!   repro run <formula>         Run a formula and print its result document
//!
//! Exit codes for `run`:
//!   0  success
//!   1  internal failure
//!   2  malformed arguments, patches or formula
//!   3  the job could not run
//!   4  the job ran but exited non-zero (unless --ignore-job-exit)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use repro_core::{validate, Formula, JobResult, ReproConfig, ReproError, ResultDocument};
use repro_scheduler::{run_formulae, Journal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

const EXIT_SUCCESS: u8 = 0;
const EXIT_INTERNAL: u8 = 1;
const EXIT_BAD_ARGS: u8 = 2;
const EXIT_JOB_FAILED: u8 = 3;
const EXIT_JOB_EXITED: u8 = 4;

#[derive(Parser)]
#[command(name = "repro")]
#[command(author, version, about = "Run formulas in a fresh filesystem and check they reproduce")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Directory to hold .repro/ (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Run a formula
    Run {
        /// Formula document (JSON)
        formula: PathBuf,

        /// Executor to run the job with (overrides config)
        #[arg(long)]
        executor: Option<String>,

        /// Scheduler to queue the job with (overrides config)
        #[arg(long)]
        scheduler: Option<String>,

        /// Exit 0 even when the job exits non-zero
        #[arg(long)]
        ignore_job_exit: bool,

        /// Patch documents merged onto the formula, in order
        #[arg(long = "patch", value_name = "FILE")]
        patches: Vec<PathBuf>,

        /// Environment overrides, applied after patches
        #[arg(short, long = "env", value_name = "KEY=VAL")]
        env: Vec<String>,

        /// Directory holding .repro/config.toml (defaults to current directory)
        #[arg(long, value_name = "DIR", default_value = ".")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {}", e);
        return ExitCode::from(EXIT_INTERNAL);
    }

    let outcome = match cli.command {
        Commands::Init { path } => cmd_init(path).await.map(|_| EXIT_SUCCESS),
        Commands::Run {
            formula,
            executor,
            scheduler,
            ignore_job_exit,
            patches,
            env,
            config,
        } => {
            cmd_run(RunArgs {
                formula,
                executor,
                scheduler,
                ignore_job_exit,
                patches,
                env,
                config,
            })
            .await
        }
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(classify(&e))
        }
    }
}

struct RunArgs {
    formula: PathBuf,
    executor: Option<String>,
    scheduler: Option<String>,
    ignore_job_exit: bool,
    patches: Vec<PathBuf>,
    env: Vec<String>,
    config: PathBuf,
}

async fn cmd_init(path: PathBuf) -> Result<()> {
    ReproConfig::write_default(&path).context("Failed to write configuration")?;
    println!("Initialized Repro in {:?}", path);
    println!("Created:");
    println!("  .repro/config.toml");
    Ok(())
}

async fn cmd_run(args: RunArgs) -> Result<u8> {
    let mut config =
        ReproConfig::load_or_default(&args.config).context("Failed to load configuration")?;
    if let Some(executor) = args.executor {
        config.executor = executor;
    }
    if let Some(scheduler) = args.scheduler {
        config.scheduler = scheduler;
    }

    let formula = load_formula(&args.formula, &args.patches, &args.env)?;
    debug!("Formula setup hash {}", formula.setup_hash());

    let executor = repro_executor::get(&config.executor, &config)?;
    let mut scheduler = repro_scheduler::get(&config.scheduler, &config)?;
    info!(
        "Running {} with the {} executor on the {} scheduler",
        args.formula.display(),
        executor.name(),
        scheduler.name()
    );

    let journal = Journal::stderr();
    let results = run_formulae(
        &mut *scheduler,
        executor,
        &journal,
        vec![formula.clone()],
    )
    .await?;
    let result = results
        .into_iter()
        .next()
        .context("Scheduler returned no result")?;

    let document = ResultDocument::new(&formula, &result);
    println!("{}", document.to_json_line()?);

    Ok(exit_code_for(&result, args.ignore_job_exit))
}

/// Read the formula, apply patch files then env overrides, and validate
fn load_formula(path: &Path, patches: &[PathBuf], env: &[String]) -> Result<Formula> {
    let mut formula = Formula::from_json_file(path)?;
    for patch in patches {
        let overlay = Formula::from_json_file(patch)?;
        formula
            .apply_patch(&overlay)
            .with_context(|| format!("Failed to apply patch {}", patch.display()))?;
    }
    if !env.is_empty() {
        formula.apply_patch(&Formula::env_patch(env)?)?;
    }
    Ok(validate(formula)?)
}

fn exit_code_for(result: &JobResult, ignore_job_exit: bool) -> u8 {
    if result.error.is_some() {
        EXIT_JOB_FAILED
    } else if result.exit_code != 0 && !ignore_job_exit {
        EXIT_JOB_EXITED
    } else {
        EXIT_SUCCESS
    }
}

/// Malformed input gets its own exit code; everything else is internal
fn classify(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<ReproError>() {
        Some(ReproError::Validation(_)) | Some(ReproError::UnknownType { .. }) => EXIT_BAD_ARGS,
        _ => EXIT_INTERNAL,
    }
}
