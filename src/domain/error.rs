use thiserror::Error;

/// Core domain errors
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    /// The backing store could not be reached or rejected the command
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Invalid goal for experiment '{experiment}': {message}")]
    InvalidGoal { experiment: String, message: String },

    #[error("'{name}' resolves to {count} experiments, expected exactly one")]
    TooManyExperiments { name: String, count: usize },

    #[error("No experiments found for '{name}'")]
    NoExperiments { name: String },

    #[error("Unsupported participant context: {capability} is not available")]
    UnsupportedContext { capability: String },
}

impl DomainError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn invalid_goal(experiment: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidGoal {
            experiment: experiment.into(),
            message: message.into(),
        }
    }

    pub fn too_many_experiments(name: impl Into<String>, count: usize) -> Self {
        Self::TooManyExperiments {
            name: name.into(),
            count,
        }
    }

    pub fn no_experiments(name: impl Into<String>) -> Self {
        Self::NoExperiments { name: name.into() }
    }

    pub fn unsupported_context(capability: impl Into<String>) -> Self {
        Self::UnsupportedContext {
            capability: capability.into(),
        }
    }

    /// Whether this error reports an unavailable store rather than a logic problem
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}
