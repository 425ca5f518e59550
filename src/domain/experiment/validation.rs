//! Experiment validation utilities

use std::fmt;

use thiserror::Error;

use crate::domain::DomainError;

/// Maximum length for experiment, variant and goal names
pub const MAX_NAME_LENGTH: usize = 64;

/// Which kind of name failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Experiment,
    Variant,
    Goal,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Experiment => write!(f, "Experiment"),
            Self::Variant => write!(f, "Variant"),
            Self::Goal => write!(f, "Goal"),
        }
    }
}

/// Validation errors for experiment definitions
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExperimentValidationError {
    #[error("{0} name cannot be empty")]
    EmptyName(NameKind),

    #[error("{0} name exceeds maximum length of {1} characters")]
    NameTooLong(NameKind, usize),

    #[error("{0} name must start with a letter or number")]
    InvalidNameStart(NameKind),

    #[error("{0} name must end with a letter or number")]
    InvalidNameEnd(NameKind),

    #[error("{0} name contains invalid character: '{1}'")]
    InvalidNameCharacter(NameKind, char),

    #[error("Experiment must have at least 1 variant")]
    NoVariants,

    #[error("Duplicate variant name: '{0}'")]
    DuplicateVariant(String),

    #[error("Duplicate goal name: '{0}'")]
    DuplicateGoal(String),

    #[error("Experiment must have exactly one control variant, found {0}")]
    ControlCount(usize),

    #[error("Variant '{0}' has invalid weight {1}, weights must be positive")]
    InvalidWeight(String, f64),

    #[error("Combined experiment '{0}' has {1} variants but its parent has {2}")]
    CombinedVariantMismatch(String, usize, usize),

    #[error("Experiment '{0}' cannot list itself as combined")]
    SelfCombined(String),

    #[error("Schedule stop time must be after its start time")]
    InvalidSchedule,
}

impl From<ExperimentValidationError> for DomainError {
    fn from(error: ExperimentValidationError) -> Self {
        DomainError::validation(error.to_string())
    }
}

/// Validate an experiment, variant or goal name
///
/// Names become store key segments, so only ASCII letters, digits, `-` and `_`
/// are accepted and the `:` separator can never appear.
pub fn validate_name(kind: NameKind, name: &str) -> Result<(), ExperimentValidationError> {
    let (Some(first), Some(last)) = (name.chars().next(), name.chars().last()) else {
        return Err(ExperimentValidationError::EmptyName(kind));
    };

    if name.len() > MAX_NAME_LENGTH {
        return Err(ExperimentValidationError::NameTooLong(kind, MAX_NAME_LENGTH));
    }

    if !first.is_ascii_alphanumeric() {
        return Err(ExperimentValidationError::InvalidNameStart(kind));
    }

    if !last.is_ascii_alphanumeric() {
        return Err(ExperimentValidationError::InvalidNameEnd(kind));
    }

    if let Some(ch) = name
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_'))
    {
        return Err(ExperimentValidationError::InvalidNameCharacter(kind, ch));
    }

    Ok(())
}
