//! Loading experiment declarations from TOML or JSON files
//!
//! ```toml
//! [[experiments]]
//! name = "checkout-button"
//! algorithm = "bandit"
//! groups = ["checkout"]
//! goals = ["click", { name = "purchase", allow_multiple_conversions = true }]
//!
//! [experiments.policy]
//! can_resume = true
//!
//! [[experiments.variants]]
//! name = "green"
//! control = true
//!
//! [[experiments.variants]]
//! name = "orange"
//! weight = 2.0
//! metadata = { color = "#ff8800" }
//! ```

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::domain::experiment::{
    AlgorithmKind, ExperimentDefinition, ExperimentName, ExperimentPolicy, Goal, GoalName,
    Metadata, PolicyOverrides, Variant, VariantName,
};
use crate::domain::DomainError;

/// Top-level layout of an experiments file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentFile {
    #[serde(default)]
    pub experiments: Vec<ExperimentSpec>,
}

/// Declaration of one experiment
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentSpec {
    pub name: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub variants: Vec<VariantSpec>,
    #[serde(default)]
    pub goals: Vec<GoalSpec>,
    #[serde(default)]
    pub algorithm: AlgorithmKind,
    #[serde(default)]
    pub policy: PolicyOverrides,
    #[serde(default)]
    pub combined: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantSpec {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub control: bool,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_weight() -> f64 {
    1.0
}

/// A goal, either by name alone or with its own conversion policy
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GoalSpec {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        allow_multiple_conversions: Option<bool>,
    },
}

impl ExperimentSpec {
    /// Build a validated definition, resolving policy overrides against `defaults`
    pub fn into_definition(
        self,
        defaults: &ExperimentPolicy,
    ) -> Result<ExperimentDefinition, DomainError> {
        let mut definition = ExperimentDefinition::new(ExperimentName::new(self.name)?)
            .with_algorithm(self.algorithm)
            .with_policy(self.policy.apply(defaults));

        if let Some(summary) = self.summary {
            definition = definition.with_summary(summary);
        }

        for variant in self.variants {
            definition = definition.with_variant(
                Variant::new(VariantName::new(variant.name)?)
                    .with_weight(variant.weight)
                    .with_control(variant.control)
                    .with_metadata(variant.metadata),
            );
        }

        for goal in self.goals {
            definition = definition.with_goal(match goal {
                GoalSpec::Name(name) => Goal::new(GoalName::new(name)?),
                GoalSpec::Detailed {
                    name,
                    allow_multiple_conversions,
                } => {
                    let goal = Goal::new(GoalName::new(name)?);
                    match allow_multiple_conversions {
                        Some(allow) => goal.with_allow_multiple_conversions(allow),
                        None => goal,
                    }
                }
            });
        }

        for child in self.combined {
            definition = definition.with_combined(ExperimentName::new(child)?);
        }

        for group in self.groups {
            definition = definition.with_group(group);
        }

        Ok(definition.validated()?)
    }
}

/// Supported declaration formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Toml,
    Json,
}

impl FileFormat {
    /// Infer the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self, DomainError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("json") => Ok(Self::Json),
            _ => Err(DomainError::configuration(format!(
                "Unsupported experiments file '{}': expected .toml or .json",
                path.display()
            ))),
        }
    }
}

/// Parse experiment declarations from a string
pub fn parse_definitions(
    content: &str,
    format: FileFormat,
    defaults: &ExperimentPolicy,
) -> Result<Vec<ExperimentDefinition>, DomainError> {
    let file: ExperimentFile = match format {
        FileFormat::Toml => toml::from_str(content).map_err(|e| {
            DomainError::configuration(format!("Invalid experiments file: {}", e))
        })?,
        FileFormat::Json => serde_json::from_str(content).map_err(|e| {
            DomainError::configuration(format!("Invalid experiments file: {}", e))
        })?,
    };

    file.experiments
        .into_iter()
        .map(|spec| spec.into_definition(defaults))
        .collect()
}

/// Load experiment declarations from a file
pub async fn load_definitions(
    path: &Path,
    defaults: &ExperimentPolicy,
) -> Result<Vec<ExperimentDefinition>, DomainError> {
    let format = FileFormat::from_path(path)?;
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        DomainError::configuration(format!(
            "Failed to read experiments file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let definitions = parse_definitions(&content, format, defaults)?;
    debug!(path = %path.display(), count = definitions.len(), "Loaded experiment definitions");

    Ok(definitions)
}
