//! Lifecycle commands

use chrono::{DateTime, Utc};
use clap::Args;
use serde_json::json;

use super::context::Context;
use super::print_json;

/// Arguments naming one experiment
#[derive(Args, Clone)]
pub struct ExperimentArgs {
    /// Experiment name
    pub experiment: String,
}

/// Arguments for the schedule command
#[derive(Args, Clone)]
pub struct ScheduleArgs {
    /// Experiment name
    pub experiment: String,

    /// Start time (RFC 3339)
    #[arg(long)]
    pub start_at: DateTime<Utc>,

    /// Stop time (RFC 3339), after the start
    #[arg(long)]
    pub stop_at: Option<DateTime<Utc>>,
}

/// Arguments for the winner command
#[derive(Args, Clone)]
pub struct WinnerArgs {
    /// Experiment name
    pub experiment: String,

    /// Winning variant
    #[arg(required_unless_present = "clear")]
    pub variant: Option<String>,

    /// Remove the declared winner instead
    #[arg(long, conflicts_with = "variant")]
    pub clear: bool,
}

fn report(experiment: &str, action: &str, applied: bool) -> anyhow::Result<()> {
    print_json(&json!({
        "experiment": experiment,
        "action": action,
        "applied": applied,
    }))
}

pub async fn start(context: &Context, args: ExperimentArgs) -> anyhow::Result<()> {
    let experiment = context.experiment(&args.experiment)?;
    let applied = context.engine.start(experiment).await?;
    report(&args.experiment, "start", applied)
}

pub async fn schedule(context: &Context, args: ScheduleArgs) -> anyhow::Result<()> {
    let experiment = context.experiment(&args.experiment)?;
    let applied = context
        .engine
        .schedule(experiment, args.start_at, args.stop_at)
        .await?;
    report(&args.experiment, "schedule", applied)
}

pub async fn pause(context: &Context, args: ExperimentArgs) -> anyhow::Result<()> {
    let experiment = context.experiment(&args.experiment)?;
    let applied = context.engine.pause(experiment).await?;
    report(&args.experiment, "pause", applied)
}

pub async fn resume(context: &Context, args: ExperimentArgs) -> anyhow::Result<()> {
    let experiment = context.experiment(&args.experiment)?;
    let applied = context.engine.resume(experiment).await?;
    report(&args.experiment, "resume", applied)
}

pub async fn stop(context: &Context, args: ExperimentArgs) -> anyhow::Result<()> {
    let experiment = context.experiment(&args.experiment)?;
    let applied = context.engine.stop(experiment).await?;
    report(&args.experiment, "stop", applied)
}

pub async fn reset(context: &Context, args: ExperimentArgs) -> anyhow::Result<()> {
    let experiment = context.experiment(&args.experiment)?;
    context.engine.reset(experiment).await?;
    report(&args.experiment, "reset", true)
}

pub async fn delete(context: &Context, args: ExperimentArgs) -> anyhow::Result<()> {
    let experiment = context.experiment(&args.experiment)?;
    context.engine.delete(experiment).await?;
    report(&args.experiment, "delete", true)
}

pub async fn winner(context: &Context, args: WinnerArgs) -> anyhow::Result<()> {
    let experiment = context.experiment(&args.experiment)?;

    match args.variant {
        Some(variant) if !args.clear => {
            context.engine.declare_winner(experiment, &variant).await?;
            report(&args.experiment, "winner", true)
        }
        _ => {
            let applied = context.engine.clear_winner(experiment).await?;
            report(&args.experiment, "clear_winner", applied)
        }
    }
}
