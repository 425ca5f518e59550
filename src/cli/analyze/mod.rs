//! Analyze command - compare variants with a calculator

use clap::Args;

use crate::domain::calculator::{BaseSelection, CalculatorKind};
use crate::infrastructure::services::AnalysisOptions;

use super::context::Context;
use super::print_json;

/// Arguments for the analyze command
#[derive(Args, Clone)]
pub struct AnalyzeArgs {
    /// Experiment name
    pub experiment: String,

    /// Goal to analyze; every declared goal when omitted
    #[arg(long)]
    pub goal: Option<String>,

    /// Calculator (score, bayesian)
    #[arg(long)]
    pub calculator: Option<CalculatorKind>,

    /// Confidence level in percent
    #[arg(long)]
    pub confidence: Option<f64>,

    /// Comparison base (control, second_best)
    #[arg(long)]
    pub base: Option<BaseSelection>,
}

pub async fn run(context: &Context, args: AnalyzeArgs) -> anyhow::Result<()> {
    let experiment = context.experiment(&args.experiment)?;
    let options = AnalysisOptions {
        calculator: args.calculator,
        confidence: args.confidence,
        base: args.base,
    };

    let goals: Vec<Option<&str>> = match args.goal.as_deref() {
        Some(goal) => vec![Some(goal)],
        None if experiment.definition().goals().is_empty() => vec![None],
        None => experiment
            .definition()
            .goals()
            .iter()
            .map(|goal| Some(goal.name().as_str()))
            .collect(),
    };

    let mut reports = Vec::with_capacity(goals.len());
    for goal in goals {
        reports.push(context.engine.analyze(experiment, goal, &options).await?);
    }

    print_json(&reports)
}
