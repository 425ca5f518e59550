//! Participant bindings over a participant store

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::domain::experiment::{ExperimentName, ParticipantBinding};
use crate::domain::store::ParticipantStore;
use crate::domain::DomainError;

/// A participant, as seen by the trial protocol
#[derive(Clone)]
pub struct Participant {
    store: Arc<dyn ParticipantStore>,
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant").finish_non_exhaustive()
    }
}

impl Participant {
    pub fn new(store: Arc<dyn ParticipantStore>) -> Self {
        Self { store }
    }

    /// The participant's binding to `experiment`
    ///
    /// A value that does not parse as a binding is treated as absent.
    pub async fn binding(
        &self,
        experiment: &ExperimentName,
    ) -> Result<Option<ParticipantBinding>, DomainError> {
        let Some(raw) = self.store.get(experiment.as_str()).await? else {
            return Ok(None);
        };

        match ParticipantBinding::from_json(&raw) {
            Ok(binding) => Ok(Some(binding)),
            Err(e) => {
                warn!(experiment = %experiment, error = %e, "Ignoring unreadable participant binding");
                Ok(None)
            }
        }
    }

    pub async fn bind(
        &self,
        experiment: &ExperimentName,
        binding: &ParticipantBinding,
    ) -> Result<(), DomainError> {
        self.store
            .set(experiment.as_str(), &binding.to_json()?)
            .await
    }

    /// Forget the participant's binding to `experiment`
    pub async fn exit(&self, experiment: &ExperimentName) -> Result<(), DomainError> {
        self.store.delete(experiment.as_str()).await
    }

    /// Every readable binding, keyed by experiment name
    pub async fn bindings(&self) -> Result<HashMap<String, ParticipantBinding>, DomainError> {
        Ok(self
            .store
            .to_map()
            .await?
            .into_iter()
            .filter_map(|(key, raw)| {
                ParticipantBinding::from_json(&raw)
                    .ok()
                    .map(|binding| (key, binding))
            })
            .collect())
    }
}
