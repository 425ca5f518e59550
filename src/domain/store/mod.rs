//! Store domain - adapter contracts for experiment state and participant bindings

mod repository;

pub use repository::{
    parse_counter, parse_timestamp, ExperimentStore, ExperimentStoreExt, ParticipantStore,
};

#[cfg(test)]
pub use repository::{MockExperimentStore, MockParticipantStore};
