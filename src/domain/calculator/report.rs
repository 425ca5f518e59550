//! Calculator input and report types

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::experiment::{GoalName, VariantName};
use crate::domain::DomainError;

// ============================================================================
// VariantCounts
// ============================================================================

/// Raw counters of one variant, as read from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantCounts {
    pub variant: VariantName,
    #[serde(default)]
    pub control: bool,
    pub participants: u64,
    pub converted: u64,
}

impl VariantCounts {
    pub fn new(variant: VariantName, participants: u64, converted: u64) -> Self {
        Self {
            variant,
            control: false,
            participants,
            converted,
        }
    }

    pub fn with_control(mut self, control: bool) -> Self {
        self.control = control;
        self
    }

    /// Conversion rate, zero without participants
    pub fn measure(&self) -> f64 {
        if self.participants == 0 {
            0.0
        } else {
            self.converted as f64 / self.participants as f64
        }
    }
}

// ============================================================================
// BaseSelection / CalculatorKind
// ============================================================================

/// Which variant the others are compared against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseSelection {
    /// The declared control variant
    #[default]
    Control,
    /// The variant with the second-highest measure
    SecondBest,
}

impl std::str::FromStr for BaseSelection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "control" => Ok(Self::Control),
            "second_best" | "second-best" => Ok(Self::SecondBest),
            _ => Err(DomainError::configuration(format!(
                "Unknown base selection: {}. Valid values: control, second_best",
                s
            ))),
        }
    }
}

/// Available calculators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculatorKind {
    #[default]
    Score,
    Bayesian,
}

impl fmt::Display for CalculatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Score => write!(f, "score"),
            Self::Bayesian => write!(f, "bayesian"),
        }
    }
}

impl std::str::FromStr for CalculatorKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "score" | "z_score" | "zscore" => Ok(Self::Score),
            "bayesian" | "bayes" => Ok(Self::Bayesian),
            _ => Err(DomainError::configuration(format!(
                "Unknown calculator: {}. Valid calculators: score, bayesian",
                s
            ))),
        }
    }
}

// ============================================================================
// AnalysisReport
// ============================================================================

/// Per-variant outcome of a calculator run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantAnalysis {
    pub variant: VariantName,
    pub participants: u64,
    pub converted: u64,
    pub measure: f64,
    /// Relative difference to the base, in percent
    pub difference: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,
    /// Percentile probability; for Score it carries the sign of the z-score
    pub probability: Option<f64>,
    /// Two-sided significance percentile (Score only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub significance: Option<f64>,
}

impl VariantAnalysis {
    pub fn from_counts(counts: &VariantCounts) -> Self {
        Self {
            variant: counts.variant.clone(),
            participants: counts.participants,
            converted: counts.converted,
            measure: counts.measure(),
            difference: None,
            z_score: None,
            probability: None,
            significance: None,
        }
    }
}

/// Result of comparing the variants of one experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub calculator: CalculatorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<GoalName>,
    pub confidence: f64,
    pub base: Option<VariantName>,
    /// Variant with the highest measure
    pub best: Option<VariantName>,
    /// The best variant, when its probability reaches the confidence level
    pub choice: Option<VariantName>,
    pub variants: Vec<VariantAnalysis>,
}

impl AnalysisReport {
    pub fn variant(&self, name: &str) -> Option<&VariantAnalysis> {
        self.variants.iter().find(|v| v.variant == name)
    }

    pub fn with_goal(mut self, goal: Option<GoalName>) -> Self {
        self.goal = goal;
        self
    }
}

/// Compare the variants of an experiment
pub trait Calculator: Send + Sync + fmt::Debug {
    fn kind(&self) -> CalculatorKind;

    fn analyze(&self, counts: &[VariantCounts]) -> Result<AnalysisReport, DomainError>;
}

/// Beta distribution density and cumulative functions
pub trait BetaDistribution: Send + Sync + fmt::Debug {
    fn pdf(&self, alpha: f64, beta: f64, x: f64) -> Result<f64, DomainError>;

    fn cdf(&self, alpha: f64, beta: f64, x: f64) -> Result<f64, DomainError>;
}

/// Index of the variant with the highest measure; earliest wins ties
pub fn best_index(counts: &[VariantCounts]) -> Option<usize> {
    counts
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (index, c)| match best {
            Some((_, measure)) if measure >= c.measure() => best,
            _ => Some((index, c.measure())),
        })
        .map(|(index, _)| index)
}

/// Index of the base variant for `selection`
pub fn base_index(counts: &[VariantCounts], selection: BaseSelection) -> Option<usize> {
    match selection {
        BaseSelection::Control => counts
            .iter()
            .position(|c| c.control)
            .or_else(|| (!counts.is_empty()).then_some(0)),
        BaseSelection::SecondBest => {
            let mut order: Vec<usize> = (0..counts.len()).collect();
            order.sort_by(|a, b| counts[*b].measure().total_cmp(&counts[*a].measure()));
            order.get(1).or(order.first()).copied()
        }
    }
}
