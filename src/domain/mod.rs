//! Domain layer - Core business logic and entities

pub mod calculator;
pub mod error;
pub mod experiment;
pub mod store;

pub use calculator::{
    AnalysisReport, BaseSelection, BetaDistribution, Calculator, CalculatorKind, VariantAnalysis,
    VariantCounts,
};
pub use error::DomainError;
pub use experiment::{
    AlgorithmKind, Experiment, ExperimentDefinition, ExperimentEvent, ExperimentHooks,
    ExperimentKind, ExperimentName, ExperimentPolicy, ExperimentStatus, Goal, GoalName,
    LifecycleState, Metadata, ParticipantBinding, Variant, VariantName,
};
pub use store::{ExperimentStore, ExperimentStoreExt, ParticipantStore};
