//! CLI module for the experiment engine
//!
//! Every command loads the application configuration, the experiment
//! declarations and the configured store, then acts on the catalog:
//! - `validate` / `status`: inspect the catalog and the stored lifecycle
//! - `start`, `schedule`, `pause`, `resume`, `stop`, `reset`, `delete`, `winner`: lifecycle
//! - `choose` / `convert`: run the trial protocol for one participant
//! - `analyze`: compare variants with a calculator

pub mod analyze;
pub mod context;
pub mod inspect;
pub mod lifecycle;
pub mod trial;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// PMP Experiment Engine - A/B/n assignment, conversion tracking and analysis
#[derive(Parser)]
#[command(name = "pmp-experiment-engine")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Experiment declarations (TOML or JSON); overrides `experiments_file`
    #[arg(long, global = true)]
    pub experiments: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Load the declarations and print the catalog
    Validate,

    /// Print the lifecycle status of every experiment
    Status(inspect::StatusArgs),

    /// Start an experiment now
    Start(lifecycle::ExperimentArgs),

    /// Start an experiment at a given time
    Schedule(lifecycle::ScheduleArgs),

    /// Pause a running experiment
    Pause(lifecycle::ExperimentArgs),

    /// Resume a paused experiment
    Resume(lifecycle::ExperimentArgs),

    /// Stop an experiment
    Stop(lifecycle::ExperimentArgs),

    /// Wipe the stored state of an experiment and save it again
    Reset(lifecycle::ExperimentArgs),

    /// Wipe the stored state of an experiment
    Delete(lifecycle::ExperimentArgs),

    /// Declare, or with `--clear` remove, the winner of an experiment
    Winner(lifecycle::WinnerArgs),

    /// Choose a variant for a participant
    Choose(trial::ChooseArgs),

    /// Record a conversion for a participant
    Convert(trial::ConvertArgs),

    /// Compare the variants of an experiment
    Analyze(analyze::AnalyzeArgs),
}

/// Dispatch a parsed command line
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let context = context::Context::bootstrap(cli.experiments.as_deref()).await?;

    match cli.command {
        Command::Validate => inspect::validate(&context),
        Command::Status(args) => inspect::status(&context, args).await,
        Command::Start(args) => lifecycle::start(&context, args).await,
        Command::Schedule(args) => lifecycle::schedule(&context, args).await,
        Command::Pause(args) => lifecycle::pause(&context, args).await,
        Command::Resume(args) => lifecycle::resume(&context, args).await,
        Command::Stop(args) => lifecycle::stop(&context, args).await,
        Command::Reset(args) => lifecycle::reset(&context, args).await,
        Command::Delete(args) => lifecycle::delete(&context, args).await,
        Command::Winner(args) => lifecycle::winner(&context, args).await,
        Command::Choose(args) => trial::choose(&context, args).await,
        Command::Convert(args) => trial::convert(&context, args).await,
        Command::Analyze(args) => analyze::run(&context, args).await,
    }
}

/// Print a value as pretty JSON on stdout
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
