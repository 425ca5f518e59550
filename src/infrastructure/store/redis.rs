//! Redis store implementations
//!
//! Every store key maps to one Redis hash: experiment state and variant
//! counters use `HSET`/`HSETNX`/`HINCRBY`, participant bags live in one hash
//! per participant.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use crate::domain::store::{ExperimentStore, ParticipantStore};
use crate::domain::DomainError;

/// Configuration for the Redis stores
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub url: String,
    /// Key prefix for namespacing
    pub key_prefix: Option<String>,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: None,
        }
    }
}

impl RedisStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    fn prefix_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }
}

/// Open a managed connection; the manager reconnects on its own
pub async fn connect(config: &RedisStoreConfig) -> Result<ConnectionManager, DomainError> {
    let client = Client::open(config.url.as_str())
        .map_err(|e| DomainError::storage(format!("Failed to create Redis client: {}", e)))?;

    ConnectionManager::new(client)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to connect to Redis: {}", e)))
}

// ============================================================================
// RedisExperimentStore
// ============================================================================

/// Experiment state and counters in Redis hashes
#[derive(Clone)]
pub struct RedisExperimentStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisExperimentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisExperimentStore")
            .field("config", &self.config)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisExperimentStore {
    pub async fn new(config: RedisStoreConfig) -> Result<Self, DomainError> {
        let connection = connect(&config).await?;
        Ok(Self { connection, config })
    }

    pub fn with_connection(connection: ConnectionManager, config: RedisStoreConfig) -> Self {
        Self { connection, config }
    }
}

#[async_trait]
impl ExperimentStore for RedisExperimentStore {
    async fn get(&self, key: &str, field: &str) -> Result<Option<String>, DomainError> {
        let mut conn = self.connection.clone();

        conn.hget(self.config.prefix_key(key), field)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to get '{}' of '{}': {}", field, key, e)))
    }

    async fn get_all(&self, key: &str) -> Result<HashMap<String, String>, DomainError> {
        let mut conn = self.connection.clone();

        conn.hgetall(self.config.prefix_key(key))
            .await
            .map_err(|e| DomainError::storage(format!("Failed to read '{}': {}", key, e)))
    }

    async fn set(&self, key: &str, field: &str, value: &str) -> Result<(), DomainError> {
        let mut conn = self.connection.clone();

        let _: () = conn
            .hset(self.config.prefix_key(key), field, value)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to set '{}' of '{}': {}", field, key, e)))?;

        Ok(())
    }

    async fn setnx(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<String>, DomainError> {
        let prefixed_key = self.config.prefix_key(key);
        let mut conn = self.connection.clone();

        let inserted: bool = conn
            .hset_nx(&prefixed_key, field, value)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to setnx '{}' of '{}': {}", field, key, e)))?;

        if inserted {
            return Ok(None);
        }

        conn.hget(&prefixed_key, field)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to get '{}' of '{}': {}", field, key, e)))
    }

    async fn delete(&self, key: &str, field: &str) -> Result<(), DomainError> {
        let mut conn = self.connection.clone();

        let _: i64 = conn
            .hdel(self.config.prefix_key(key), field)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to delete '{}' of '{}': {}", field, key, e)))?;

        Ok(())
    }

    async fn exists(&self, key: &str, field: &str) -> Result<bool, DomainError> {
        let mut conn = self.connection.clone();

        conn.hexists(self.config.prefix_key(key), field)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to check '{}' of '{}': {}", field, key, e)))
    }

    async fn increment(&self, key: &str, field: &str, by: i64) -> Result<i64, DomainError> {
        let mut conn = self.connection.clone();

        conn.hincr(self.config.prefix_key(key), field, by)
            .await
            .map_err(|e| {
                DomainError::storage(format!("Failed to increment '{}' of '{}': {}", field, key, e))
            })
    }

    async fn persisted(&self, key: &str) -> Result<bool, DomainError> {
        let mut conn = self.connection.clone();

        conn.exists(self.config.prefix_key(key))
            .await
            .map_err(|e| DomainError::storage(format!("Failed to check '{}': {}", key, e)))
    }

    async fn destroy(&self, key: &str) -> Result<(), DomainError> {
        let mut conn = self.connection.clone();

        let _: i64 = conn
            .del(self.config.prefix_key(key))
            .await
            .map_err(|e| DomainError::storage(format!("Failed to destroy '{}': {}", key, e)))?;

        Ok(())
    }
}

// ============================================================================
// RedisParticipantStore
// ============================================================================

/// One participant's bag, stored as the hash `participants:<id>`
#[derive(Clone)]
pub struct RedisParticipantStore {
    connection: ConnectionManager,
    key: String,
}

impl fmt::Debug for RedisParticipantStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisParticipantStore")
            .field("key", &self.key)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisParticipantStore {
    pub fn new(connection: ConnectionManager, config: &RedisStoreConfig, participant_id: &str) -> Self {
        Self {
            connection,
            key: config.prefix_key(&format!("participants:{}", participant_id)),
        }
    }
}

#[async_trait]
impl ParticipantStore for RedisParticipantStore {
    async fn get(&self, key: &str) -> Result<Option<String>, DomainError> {
        let mut conn = self.connection.clone();

        conn.hget(&self.key, key)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to get participant key '{}': {}", key, e)))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DomainError> {
        let mut conn = self.connection.clone();

        let _: () = conn
            .hset(&self.key, key, value)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to set participant key '{}': {}", key, e)))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DomainError> {
        let mut conn = self.connection.clone();

        let _: i64 = conn.hdel(&self.key, key).await.map_err(|e| {
            DomainError::storage(format!("Failed to delete participant key '{}': {}", key, e))
        })?;

        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, DomainError> {
        let mut conn = self.connection.clone();

        conn.hkeys(&self.key)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to list participant keys: {}", e)))
    }

    async fn contains_key(&self, key: &str) -> Result<bool, DomainError> {
        let mut conn = self.connection.clone();

        conn.hexists(&self.key, key).await.map_err(|e| {
            DomainError::storage(format!("Failed to check participant key '{}': {}", key, e))
        })
    }

    async fn to_map(&self) -> Result<HashMap<String, String>, DomainError> {
        let mut conn = self.connection.clone();

        conn.hgetall(&self.key)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to read participant: {}", e)))
    }
}
