//! Store factory for runtime selection

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::store::ExperimentStore;
use crate::domain::DomainError;

use super::identity::{IdentityStrategy, ParticipantBackend, ParticipantResolver};
use super::in_memory::{InMemoryExperimentStore, InMemoryParticipantDirectory};
use super::redis::{connect, RedisExperimentStore, RedisStoreConfig};

/// Supported store backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Process-local maps
    #[default]
    InMemory,
    /// Redis hashes
    Redis,
}

impl std::fmt::Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreType::InMemory => write!(f, "in_memory"),
            StoreType::Redis => write!(f, "redis"),
        }
    }
}

impl std::str::FromStr for StoreType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_memory" | "inmemory" | "memory" => Ok(StoreType::InMemory),
            "redis" => Ok(StoreType::Redis),
            _ => Err(DomainError::configuration(format!(
                "Unknown store type: {}. Valid types: in_memory, redis",
                s
            ))),
        }
    }
}

/// Store selection, as read from the application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Backend of both the experiment and the participant stores
    #[serde(rename = "type")]
    pub store_type: StoreType,
    /// Redis URL (required for the Redis backend)
    pub redis_url: Option<String>,
    /// Key prefix for namespacing
    pub key_prefix: Option<String>,
    /// How participants are identified
    pub identity: IdentityStrategy,
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            store_type: StoreType::Redis,
            redis_url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_identity(mut self, identity: IdentityStrategy) -> Self {
        self.identity = identity;
        self
    }
}

/// The stores built from one configuration
#[derive(Clone)]
pub struct Stores {
    pub experiments: Arc<dyn ExperimentStore>,
    pub participants: ParticipantResolver,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores")
            .field("participants", &self.participants)
            .finish_non_exhaustive()
    }
}

/// Factory for creating store instances
#[derive(Debug, Default)]
pub struct StoreFactory;

impl StoreFactory {
    pub fn new() -> Self {
        Self
    }

    /// Creates the experiment store and participant resolver for `config`
    pub async fn create(&self, config: &StoreConfig) -> Result<Stores, DomainError> {
        match config.store_type {
            StoreType::InMemory => {
                info!(identity = %config.identity, "Using in-memory experiment store");

                Ok(Stores {
                    experiments: Arc::new(InMemoryExperimentStore::new()),
                    participants: ParticipantResolver::new(
                        config.identity,
                        ParticipantBackend::InMemory(Arc::new(InMemoryParticipantDirectory::new())),
                    ),
                })
            }
            StoreType::Redis => {
                let url = config.redis_url.clone().ok_or_else(|| {
                    DomainError::configuration("Redis URL is required for Redis store type")
                })?;

                let mut redis_config = RedisStoreConfig::new(url);
                if let Some(prefix) = &config.key_prefix {
                    redis_config = redis_config.with_key_prefix(prefix.clone());
                }

                let connection = connect(&redis_config).await?;
                info!(identity = %config.identity, "Using Redis experiment store");

                Ok(Stores {
                    experiments: Arc::new(RedisExperimentStore::with_connection(
                        connection.clone(),
                        redis_config.clone(),
                    )),
                    participants: ParticipantResolver::new(
                        config.identity,
                        ParticipantBackend::Redis(connection, redis_config),
                    ),
                })
            }
        }
    }
}
