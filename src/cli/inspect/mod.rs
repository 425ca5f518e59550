//! Inspect commands - catalog and lifecycle status

use clap::Args;
use serde::Serialize;

use crate::domain::experiment::{AlgorithmKind, ExperimentStatus, LifecycleState};
use crate::infrastructure::services::LifecycleFilter;

use super::context::Context;
use super::print_json;

/// Arguments for the status command
#[derive(Args, Clone)]
pub struct StatusArgs {
    /// Only list experiments in this state (started, running, scheduled,
    /// paused, stopped, ended, unstarted, calibrating)
    #[arg(long)]
    pub filter: Option<LifecycleFilter>,
}

#[derive(Serialize)]
struct CatalogEntry<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
    algorithm: AlgorithmKind,
    variants: Vec<&'a str>,
    control: Option<&'a str>,
    goals: Vec<&'a str>,
    groups: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    combined_with: Option<&'a str>,
    derived: bool,
}

#[derive(Serialize)]
struct StatusEntry<'a> {
    name: &'a str,
    status: ExperimentStatus,
    #[serde(flatten)]
    state: LifecycleState,
}

/// Print every experiment of the catalog
pub fn validate(context: &Context) -> anyhow::Result<()> {
    let catalog = context.engine.catalog();

    let entries: Vec<CatalogEntry<'_>> = catalog
        .all()
        .iter()
        .map(|experiment| {
            let definition = experiment.definition();
            CatalogEntry {
                name: definition.name().as_str(),
                summary: definition.summary(),
                algorithm: definition.algorithm(),
                variants: definition
                    .variants()
                    .iter()
                    .map(|variant| variant.name().as_str())
                    .collect(),
                control: definition
                    .control_variant()
                    .map(|variant| variant.name().as_str()),
                goals: definition
                    .goals()
                    .iter()
                    .map(|goal| goal.name().as_str())
                    .collect(),
                groups: definition.groups(),
                combined_with: definition.parent().map(|parent| parent.as_str()),
                derived: catalog.is_derived(definition.name().as_str()),
            }
        })
        .collect();

    print_json(&entries)
}

/// Print the stored lifecycle state of every (or every matching) experiment
pub async fn status(context: &Context, args: StatusArgs) -> anyhow::Result<()> {
    let engine = &context.engine;
    let experiments = match args.filter {
        Some(filter) => engine.select(filter).await?,
        None => engine.catalog().all().iter().collect(),
    };

    let mut entries = Vec::with_capacity(experiments.len());
    for experiment in experiments {
        let state = engine.state(experiment).await?;
        entries.push(StatusEntry {
            name: experiment.name().as_str(),
            status: state.status(experiment.definition().policy(), chrono::Utc::now()),
            state,
        });
    }

    print_json(&entries)
}
