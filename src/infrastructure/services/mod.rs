//! Infrastructure services

mod catalog;
mod engine;
mod participant;
mod trial;

pub use catalog::{Catalog, LifecycleFilter};
pub use engine::{AnalysisOptions, EngineConfig, ExperimentEngine, MultipleExperiments};
pub use participant::Participant;
pub use trial::{ChooseRequest, Trial};
