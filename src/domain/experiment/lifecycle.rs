//! Lifecycle state of an experiment, read from the store

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{ExperimentPolicy, VariantName};

/// Store fields holding the lifecycle of an experiment
pub mod fields {
    pub const DEFINITION: &str = "definition";
    pub const CREATED_AT: &str = "created_at";
    pub const STARTED_AT: &str = "started_at";
    pub const PAUSED_AT: &str = "paused_at";
    pub const STOPPED_AT: &str = "stopped_at";
    pub const WINNER: &str = "winner";

    // Counters, kept under the variant key
    pub const PARTICIPANTS: &str = "participants";
    pub const CONVERTED: &str = "converted";

    /// Conversion counter of `goal`, or the goal-less counter
    pub fn converted(goal: Option<&str>) -> String {
        match goal {
            Some(goal) => format!("{}:{}", CONVERTED, goal),
            None => CONVERTED.to_string(),
        }
    }
}

/// Coarse status of an experiment at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Never started, not scheduled, no winner
    Fresh,
    /// Collecting control data before the start
    Calibrating,
    /// Start time lies in the future
    Scheduled,
    Running,
    Paused,
    Stopped,
    /// A winner is declared, regardless of the timestamps
    Decided,
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::Calibrating => write!(f, "calibrating"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
            Self::Decided => write!(f, "decided"),
        }
    }
}

/// Snapshot of the persisted lifecycle timestamps and winner
///
/// All predicates compare the stored timestamps with the supplied `now`, so a
/// scheduled start or stop takes effect lazily without any timer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleState {
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Winner declared on this experiment itself
    pub winner: Option<VariantName>,
    /// For experiments with combined siblings: whether every sibling declared a winner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combined_winners: Option<bool>,
}

impl LifecycleState {
    pub fn is_scheduled(&self, now: DateTime<Utc>) -> bool {
        self.started_at.is_some_and(|at| at > now)
    }

    pub fn is_started(&self, now: DateTime<Utc>) -> bool {
        self.started_at.is_some_and(|at| at <= now)
    }

    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.paused_at.is_some_and(|at| at <= now)
    }

    pub fn is_stopped(&self, now: DateTime<Utc>) -> bool {
        self.stopped_at.is_some_and(|at| at <= now)
    }

    pub fn is_running(&self, now: DateTime<Utc>) -> bool {
        self.is_started(now) && !self.is_paused(now) && !self.is_stopped(now)
    }

    pub fn is_calibrating(&self, policy: &ExperimentPolicy, now: DateTime<Utc>) -> bool {
        policy.enable_calibration && policy.start_manually && !self.is_started(now)
    }

    /// Whether a winner is in effect; combined groups need every sibling decided
    pub fn has_winner(&self) -> bool {
        match self.combined_winners {
            Some(all_decided) => all_decided,
            None => self.winner.is_some(),
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.is_started(now) && !self.is_scheduled(now) && !self.has_winner()
    }

    pub fn status(&self, policy: &ExperimentPolicy, now: DateTime<Utc>) -> ExperimentStatus {
        if self.has_winner() {
            ExperimentStatus::Decided
        } else if self.is_stopped(now) {
            ExperimentStatus::Stopped
        } else if self.is_scheduled(now) {
            ExperimentStatus::Scheduled
        } else if self.is_paused(now) {
            ExperimentStatus::Paused
        } else if self.is_running(now) {
            ExperimentStatus::Running
        } else if self.is_calibrating(policy, now) {
            ExperimentStatus::Calibrating
        } else {
            ExperimentStatus::Fresh
        }
    }
}
