//! Trial commands - choose and convert on behalf of one participant

use clap::Args;
use serde_json::json;

use crate::domain::experiment::Metadata;
use crate::infrastructure::services::{ChooseRequest, Participant};
use crate::infrastructure::store::ParticipantContext;

use super::context::Context;
use super::print_json;

/// Identity of the participant a trial runs for
#[derive(Args, Clone)]
pub struct ParticipantArgs {
    /// Authenticated user identifier
    #[arg(long)]
    pub user: Option<String>,

    /// Session identifier
    #[arg(long)]
    pub session: Option<String>,

    /// Request metadata as a JSON object
    #[arg(long, value_parser = parse_metadata)]
    pub metadata: Option<Metadata>,
}

/// Arguments for the choose command
#[derive(Args, Clone)]
pub struct ChooseArgs {
    /// Experiment name, or the group holding a single experiment
    pub experiment: String,

    #[command(flatten)]
    pub participant: ParticipantArgs,

    /// Force a variant
    #[arg(long = "override")]
    pub override_variant: Option<String>,

    /// Treat the request as excluded (e.g. a bot)
    #[arg(long)]
    pub excluded: bool,
}

/// Arguments for the convert command
#[derive(Args, Clone)]
pub struct ConvertArgs {
    /// Experiment name or group
    pub experiment: String,

    #[command(flatten)]
    pub participant: ParticipantArgs,

    /// Goal to convert
    #[arg(long)]
    pub goal: Option<String>,
}

fn parse_metadata(raw: &str) -> Result<Metadata, String> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err("metadata must be a JSON object".to_string()),
        Err(e) => Err(format!("invalid metadata: {}", e)),
    }
}

async fn participant(context: &Context, args: &ParticipantArgs) -> anyhow::Result<Participant> {
    let mut participant_context = ParticipantContext::new();
    if let Some(user) = &args.user {
        participant_context = participant_context.with_user_id(user);
    }
    if let Some(session) = &args.session {
        participant_context = participant_context.with_session_id(session);
    }

    let store = context.participants.resolve(&participant_context).await?;
    Ok(Participant::new(store))
}

pub async fn choose(context: &Context, args: ChooseArgs) -> anyhow::Result<()> {
    let participant = participant(context, &args.participant).await?;
    let trial = context.engine.trial(&args.experiment, participant)?;

    let mut request = ChooseRequest::new()
        .with_excluded(args.excluded)
        .with_metadata(args.participant.metadata.unwrap_or_default());
    if let Some(variant) = args.override_variant {
        request = request.with_override(variant);
    }

    let variant = trial.choose(&request).await?;

    print_json(&json!({
        "experiment": trial.experiment().name().as_str(),
        "variant": variant.name().as_str(),
        "control": variant.is_control(),
        "metadata": variant.metadata(),
    }))
}

pub async fn convert(context: &Context, args: ConvertArgs) -> anyhow::Result<()> {
    let participant = participant(context, &args.participant).await?;
    let metadata = args.participant.metadata.unwrap_or_default();

    let results = context
        .engine
        .convert_all(
            &args.experiment,
            &participant,
            args.goal.as_deref(),
            &metadata,
        )
        .await?;

    let results: Vec<_> = results
        .into_iter()
        .map(|(experiment, converted)| {
            json!({
                "experiment": experiment.as_str(),
                "converted": converted,
            })
        })
        .collect();

    print_json(&results)
}
