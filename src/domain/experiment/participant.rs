//! Binding between one participant and one experiment

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{GoalName, VariantName};
use crate::domain::DomainError;

/// Checkpoint recorded for conversions of experiments without goals
///
/// Goal names must start with an alphanumeric character, so this key never
/// collides with a declared goal.
pub const DEFAULT_CHECKPOINT: &str = "*";

/// A participant's assignment, stored as JSON under the experiment name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantBinding {
    variant: VariantName,
    assigned_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    converted: BTreeMap<String, DateTime<Utc>>,
}

impl ParticipantBinding {
    pub fn new(variant: VariantName, assigned_at: DateTime<Utc>) -> Self {
        Self {
            variant,
            assigned_at,
            converted: BTreeMap::new(),
        }
    }

    pub fn variant(&self) -> &VariantName {
        &self.variant
    }

    pub fn assigned_at(&self) -> DateTime<Utc> {
        self.assigned_at
    }

    /// Checkpoints converted so far with their timestamps
    pub fn converted(&self) -> &BTreeMap<String, DateTime<Utc>> {
        &self.converted
    }

    /// Refresh the assignment timestamp on sticky reuse
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.assigned_at = at;
    }

    /// Whether this binding predates the experiment's current start
    ///
    /// Bindings made while calibrating, or before a reset, do not survive a start.
    pub fn is_stale(&self, started_at: Option<DateTime<Utc>>) -> bool {
        started_at.is_some_and(|started| self.assigned_at < started)
    }

    pub fn has_converted(&self, goal: Option<&GoalName>) -> bool {
        self.converted.contains_key(checkpoint_key(goal))
    }

    /// Whether any checkpoint other than `goal` was converted
    pub fn has_converted_other(&self, goal: Option<&GoalName>) -> bool {
        let key = checkpoint_key(goal);
        self.converted.keys().any(|k| k != key)
    }

    pub fn record_conversion(&mut self, goal: Option<&GoalName>, at: DateTime<Utc>) {
        self.converted.insert(checkpoint_key(goal).to_string(), at);
    }

    pub fn to_json(&self) -> Result<String, DomainError> {
        serde_json::to_string(self)
            .map_err(|e| DomainError::internal(format!("Failed to serialize binding: {}", e)))
    }

    pub fn from_json(raw: &str) -> Result<Self, DomainError> {
        serde_json::from_str(raw)
            .map_err(|e| DomainError::internal(format!("Failed to parse binding: {}", e)))
    }
}

fn checkpoint_key(goal: Option<&GoalName>) -> &str {
    goal.map(GoalName::as_str).unwrap_or(DEFAULT_CHECKPOINT)
}
