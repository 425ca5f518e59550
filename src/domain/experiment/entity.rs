//! Experiment domain entities

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::validation::{validate_name, ExperimentValidationError, NameKind};
use crate::domain::DomainError;

/// Opaque key/value bag attached to variants and requests
pub type Metadata = serde_json::Map<String, serde_json::Value>;

macro_rules! validated_name {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new name with validation
            pub fn new(name: impl Into<String>) -> Result<Self, ExperimentValidationError> {
                let name = name.into();
                validate_name($kind, &name)?;
                Ok(Self(name))
            }

            /// Get the name as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ExperimentValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = ExperimentValidationError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(name: $name) -> Self {
                name.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

validated_name!(
    /// Unique name of an experiment, also its store key
    ExperimentName,
    NameKind::Experiment
);

validated_name!(
    /// Name of a variant, unique within its experiment
    VariantName,
    NameKind::Variant
);

validated_name!(
    /// Name of a conversion goal (checkpoint), unique within its experiment
    GoalName,
    NameKind::Goal
);

// ============================================================================
// AlgorithmKind
// ============================================================================

/// Bucketing strategy used to pick a variant for a new participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Frequencies proportional to variant weights
    #[default]
    Weighted,
    /// Always fill the variant with the fewest participants
    Distributed,
    /// Uniform choice, ignoring weights and counters
    Random,
    /// Thompson sampling over conversion rates
    Bandit,
    /// Metadata matching, falling back to control
    Static,
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weighted => write!(f, "weighted"),
            Self::Distributed => write!(f, "distributed"),
            Self::Random => write!(f, "random"),
            Self::Bandit => write!(f, "bandit"),
            Self::Static => write!(f, "static"),
        }
    }
}

impl std::str::FromStr for AlgorithmKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weighted" => Ok(Self::Weighted),
            "distributed" => Ok(Self::Distributed),
            "random" => Ok(Self::Random),
            "bandit" => Ok(Self::Bandit),
            "static" => Ok(Self::Static),
            _ => Err(DomainError::configuration(format!(
                "Unknown algorithm: {}. Valid algorithms: weighted, distributed, random, bandit, static",
                s
            ))),
        }
    }
}

// ============================================================================
// ExperimentPolicy
// ============================================================================

/// Behavioural flags of an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentPolicy {
    /// Reuse a participant's existing assignment on later requests
    pub sticky_assignment: bool,
    /// Wait for an explicit start instead of starting on first use
    pub start_manually: bool,
    /// Keep the participant's assignment after a conversion
    pub reset_manually: bool,
    /// Track control participation and conversions before the start
    pub enable_calibration: bool,
    /// Count repeated conversions of the same checkpoint
    pub allow_multiple_conversions: bool,
    /// Count conversions of more than one goal per participant
    pub allow_multiple_goals: bool,
    /// Keep counting participation and conversions after a winner is declared
    pub track_winner_conversions: bool,
    /// Allow pause and resume
    pub can_resume: bool,
    /// Ignore the caller-side request exclusion
    pub skip_request_filter: bool,
    /// Persist the binding when an override is used
    pub store_override: bool,
    /// Count participation when an override is used
    pub track_override: bool,
}

impl Default for ExperimentPolicy {
    fn default() -> Self {
        Self {
            sticky_assignment: true,
            start_manually: true,
            reset_manually: true,
            enable_calibration: false,
            allow_multiple_conversions: false,
            allow_multiple_goals: false,
            track_winner_conversions: false,
            can_resume: false,
            skip_request_filter: false,
            store_override: false,
            track_override: false,
        }
    }
}

/// Partial policy used by declarations; unset fields inherit the engine default
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyOverrides {
    pub sticky_assignment: Option<bool>,
    pub start_manually: Option<bool>,
    pub reset_manually: Option<bool>,
    pub enable_calibration: Option<bool>,
    pub allow_multiple_conversions: Option<bool>,
    pub allow_multiple_goals: Option<bool>,
    pub track_winner_conversions: Option<bool>,
    pub can_resume: Option<bool>,
    pub skip_request_filter: Option<bool>,
    pub store_override: Option<bool>,
    pub track_override: Option<bool>,
}

impl PolicyOverrides {
    /// Resolve the overrides against a base policy
    pub fn apply(&self, base: &ExperimentPolicy) -> ExperimentPolicy {
        ExperimentPolicy {
            sticky_assignment: self.sticky_assignment.unwrap_or(base.sticky_assignment),
            start_manually: self.start_manually.unwrap_or(base.start_manually),
            reset_manually: self.reset_manually.unwrap_or(base.reset_manually),
            enable_calibration: self.enable_calibration.unwrap_or(base.enable_calibration),
            allow_multiple_conversions: self
                .allow_multiple_conversions
                .unwrap_or(base.allow_multiple_conversions),
            allow_multiple_goals: self
                .allow_multiple_goals
                .unwrap_or(base.allow_multiple_goals),
            track_winner_conversions: self
                .track_winner_conversions
                .unwrap_or(base.track_winner_conversions),
            can_resume: self.can_resume.unwrap_or(base.can_resume),
            skip_request_filter: self
                .skip_request_filter
                .unwrap_or(base.skip_request_filter),
            store_override: self.store_override.unwrap_or(base.store_override),
            track_override: self.track_override.unwrap_or(base.track_override),
        }
    }
}

// ============================================================================
// Variant
// ============================================================================

/// An arm of an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    name: VariantName,
    weight: f64,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    metadata: Metadata,
    #[serde(default)]
    control: bool,
}

impl Variant {
    /// Create a new variant with weight 1
    pub fn new(name: VariantName) -> Self {
        Self {
            name,
            weight: 1.0,
            metadata: Metadata::new(),
            control: false,
        }
    }

    /// Set the weight
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Set the metadata
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set whether this is the control variant
    pub fn with_control(mut self, control: bool) -> Self {
        self.control = control;
        self
    }

    pub fn name(&self) -> &VariantName {
        &self.name
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn is_control(&self) -> bool {
        self.control
    }
}

// ============================================================================
// Goal
// ============================================================================

/// A named conversion checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    name: GoalName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow_multiple_conversions: Option<bool>,
}

impl Goal {
    pub fn new(name: GoalName) -> Self {
        Self {
            name,
            allow_multiple_conversions: None,
        }
    }

    /// Override the experiment's multiple-conversion policy for this goal
    pub fn with_allow_multiple_conversions(mut self, allow: bool) -> Self {
        self.allow_multiple_conversions = Some(allow);
        self
    }

    pub fn name(&self) -> &GoalName {
        &self.name
    }

    pub fn allow_multiple_conversions(&self) -> Option<bool> {
        self.allow_multiple_conversions
    }
}

// ============================================================================
// ExperimentKind
// ============================================================================

/// Whether an experiment buckets on its own or follows a parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExperimentKind {
    #[default]
    Standalone,
    /// Lifecycle and variant choice are delegated to `parent`, variants map by position
    Combined { parent: ExperimentName },
}

// ============================================================================
// ExperimentDefinition
// ============================================================================

/// Declarative definition of an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDefinition {
    name: ExperimentName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    variants: Vec<Variant>,
    #[serde(default)]
    goals: Vec<Goal>,
    #[serde(default)]
    algorithm: AlgorithmKind,
    #[serde(default)]
    policy: ExperimentPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    combined: Vec<ExperimentName>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    groups: Vec<String>,
    #[serde(default)]
    kind: ExperimentKind,
}

impl ExperimentDefinition {
    /// Create an empty standalone definition with the default policy
    pub fn new(name: ExperimentName) -> Self {
        Self {
            name,
            summary: None,
            variants: Vec::new(),
            goals: Vec::new(),
            algorithm: AlgorithmKind::default(),
            policy: ExperimentPolicy::default(),
            combined: Vec::new(),
            groups: Vec::new(),
            kind: ExperimentKind::Standalone,
        }
    }

    // Builder methods

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variants.push(variant);
        self
    }

    pub fn with_goal(mut self, goal: Goal) -> Self {
        self.goals.push(goal);
        self
    }

    pub fn with_algorithm(mut self, algorithm: AlgorithmKind) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_policy(mut self, policy: ExperimentPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Declare experiments that follow this one's bucketing
    pub fn with_combined(mut self, child: ExperimentName) -> Self {
        self.combined.push(child);
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Make this a combined experiment following `parent`
    pub fn combined_with(mut self, parent: ExperimentName) -> Self {
        self.kind = ExperimentKind::Combined { parent };
        self
    }

    /// Derive the combined child `name` from this definition; groups stay with the parent
    pub fn derive_combined(&self, name: ExperimentName) -> Self {
        Self {
            name,
            summary: self.summary.clone(),
            variants: self.variants.clone(),
            goals: self.goals.clone(),
            algorithm: self.algorithm,
            policy: self.policy,
            combined: Vec::new(),
            groups: Vec::new(),
            kind: ExperimentKind::Combined {
                parent: self.name.clone(),
            },
        }
    }

    // Getters

    pub fn name(&self) -> &ExperimentName {
        &self.name
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    pub fn algorithm(&self) -> AlgorithmKind {
        self.algorithm
    }

    pub fn policy(&self) -> &ExperimentPolicy {
        &self.policy
    }

    pub fn combined(&self) -> &[ExperimentName] {
        &self.combined
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn kind(&self) -> &ExperimentKind {
        &self.kind
    }

    pub fn is_combined(&self) -> bool {
        matches!(self.kind, ExperimentKind::Combined { .. })
    }

    /// The experiment this one follows, if combined
    pub fn parent(&self) -> Option<&ExperimentName> {
        match &self.kind {
            ExperimentKind::Combined { parent } => Some(parent),
            ExperimentKind::Standalone => None,
        }
    }

    // Lookups

    pub fn variant(&self, name: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.name() == name)
    }

    pub fn variant_index(&self, name: &str) -> Option<usize> {
        self.variants.iter().position(|v| v.name() == name)
    }

    /// The flagged control variant, or the first one
    pub fn control_variant(&self) -> Option<&Variant> {
        self.variants
            .iter()
            .find(|v| v.is_control())
            .or_else(|| self.variants.first())
    }

    pub fn goal(&self, name: &str) -> Option<&Goal> {
        self.goals.iter().find(|g| g.name() == name)
    }

    /// Multiple-conversion policy of a goal, or of the experiment without one
    pub fn allows_multiple_conversions(&self, goal: Option<&Goal>) -> bool {
        goal.and_then(Goal::allow_multiple_conversions)
            .unwrap_or(self.policy.allow_multiple_conversions)
    }

    /// Store key holding the counters of `variant`
    pub fn variant_key(&self, variant: &VariantName) -> String {
        format!("{}:{}", self.name, variant)
    }

    // Validation

    /// Check the definition invariants, flagging the first variant as control
    /// when none is flagged
    pub fn validated(mut self) -> Result<Self, ExperimentValidationError> {
        if self.variants.is_empty() {
            return Err(ExperimentValidationError::NoVariants);
        }

        {
            let mut seen = HashSet::new();

            for variant in &self.variants {
                if !seen.insert(variant.name().as_str()) {
                    return Err(ExperimentValidationError::DuplicateVariant(
                        variant.name().to_string(),
                    ));
                }

                if !(variant.weight().is_finite() && variant.weight() > 0.0) {
                    return Err(ExperimentValidationError::InvalidWeight(
                        variant.name().to_string(),
                        variant.weight(),
                    ));
                }
            }

            let mut seen_goals = HashSet::new();

            for goal in &self.goals {
                if !seen_goals.insert(goal.name().as_str()) {
                    return Err(ExperimentValidationError::DuplicateGoal(
                        goal.name().to_string(),
                    ));
                }
            }
        }

        if self.combined.iter().any(|c| *c == self.name) {
            return Err(ExperimentValidationError::SelfCombined(self.name.to_string()));
        }

        let controls = self.variants.iter().filter(|v| v.is_control()).count();

        match controls {
            0 => self.variants[0].control = true,
            1 => {}
            n => return Err(ExperimentValidationError::ControlCount(n)),
        }

        Ok(self)
    }
}
