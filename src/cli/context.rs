//! Shared bootstrap of the CLI commands

use std::path::Path;

use tracing::info;

use crate::config::AppConfig;
use crate::domain::experiment::Experiment;
use crate::infrastructure::experiment::load_definitions;
use crate::infrastructure::logging;
use crate::infrastructure::services::{Catalog, ExperimentEngine};
use crate::infrastructure::store::{ParticipantResolver, StoreFactory};

/// Everything a command needs
pub struct Context {
    pub config: AppConfig,
    pub engine: ExperimentEngine,
    pub participants: ParticipantResolver,
}

impl Context {
    /// Load configuration, declarations and stores
    pub async fn bootstrap(experiments: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = AppConfig::load().unwrap_or_default();
        logging::init_logging(&config.logging);
        config.engine.validate()?;

        let path = experiments
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config.experiments_path());
        let definitions = load_definitions(&path, &config.engine.default_policy).await?;
        let catalog = Catalog::from_definitions(definitions)?;
        info!(path = %path.display(), experiments = catalog.len(), "Catalog loaded");

        let stores = StoreFactory::new().create(&config.store).await?;
        let engine = ExperimentEngine::new(config.engine.clone(), catalog, stores.experiments);

        Ok(Self {
            config,
            engine,
            participants: stores.participants,
        })
    }

    pub fn experiment(&self, name: &str) -> anyhow::Result<&Experiment> {
        Ok(self.engine.experiment(name)?)
    }
}
