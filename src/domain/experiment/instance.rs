//! A registered experiment: its definition paired with its hooks

use std::sync::Arc;

use super::entity::{ExperimentDefinition, ExperimentName};
use super::hooks::{ExperimentEvent, ExperimentHooks};

/// Cheap-to-clone handle shared by the catalog and every trial
#[derive(Debug, Clone)]
pub struct Experiment {
    definition: Arc<ExperimentDefinition>,
    hooks: Arc<ExperimentHooks>,
}

impl Experiment {
    pub fn new(definition: ExperimentDefinition) -> Self {
        Self {
            definition: Arc::new(definition),
            hooks: Arc::new(ExperimentHooks::default()),
        }
    }

    pub fn with_hooks(mut self, hooks: ExperimentHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Derive the combined child `name`, sharing this experiment's hooks
    pub fn derive_combined(&self, name: ExperimentName) -> Self {
        Self {
            definition: Arc::new(self.definition.derive_combined(name)),
            hooks: self.hooks.clone(),
        }
    }

    pub fn definition(&self) -> &ExperimentDefinition {
        &self.definition
    }

    pub fn hooks(&self) -> &ExperimentHooks {
        &self.hooks
    }

    pub fn name(&self) -> &ExperimentName {
        self.definition.name()
    }

    pub fn emit(&self, event: &ExperimentEvent<'_>) {
        self.hooks.emit(&self.definition, event);
    }
}
