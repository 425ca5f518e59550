//! Experiment domain module
//!
//! Definitions, lifecycle snapshots, participant bindings and callback hooks of
//! A/B/n experiments.

mod entity;
mod hooks;
mod instance;
mod lifecycle;
mod participant;
mod validation;

pub use entity::{
    AlgorithmKind, ExperimentDefinition, ExperimentKind, ExperimentName, ExperimentPolicy, Goal,
    GoalName, Metadata, PolicyOverrides, Variant, VariantName,
};
pub use hooks::{
    ConversionContext, EventHandler, EventKind, ExperimentEvent, ExperimentHooks, ReduceChain,
    StaticMatcher,
};
pub use instance::Experiment;
pub use lifecycle::{fields, ExperimentStatus, LifecycleState};
pub use participant::{ParticipantBinding, DEFAULT_CHECKPOINT};
pub use validation::{validate_name, ExperimentValidationError, NameKind, MAX_NAME_LENGTH};
