//! In-memory store implementations

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::domain::store::{ExperimentStore, ParticipantStore};
use crate::domain::DomainError;

fn read_error<E: std::fmt::Display>(e: E) -> DomainError {
    DomainError::internal(format!("Failed to acquire read lock: {}", e))
}

fn write_error<E: std::fmt::Display>(e: E) -> DomainError {
    DomainError::internal(format!("Failed to acquire write lock: {}", e))
}

// ============================================================================
// InMemoryExperimentStore
// ============================================================================

/// Single-process hash store; all operations on one key are serialized
#[derive(Debug, Default)]
pub struct InMemoryExperimentStore {
    hashes: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryExperimentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently holding fields
    pub fn len(&self) -> Result<usize, DomainError> {
        Ok(self.hashes.read().map_err(read_error)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, DomainError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl ExperimentStore for InMemoryExperimentStore {
    async fn get(&self, key: &str, field: &str) -> Result<Option<String>, DomainError> {
        let hashes = self.hashes.read().map_err(read_error)?;
        Ok(hashes.get(key).and_then(|hash| hash.get(field)).cloned())
    }

    async fn get_all(&self, key: &str) -> Result<HashMap<String, String>, DomainError> {
        let hashes = self.hashes.read().map_err(read_error)?;
        Ok(hashes.get(key).cloned().unwrap_or_default())
    }

    async fn set(&self, key: &str, field: &str, value: &str) -> Result<(), DomainError> {
        let mut hashes = self.hashes.write().map_err(write_error)?;
        hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn setnx(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<String>, DomainError> {
        let mut hashes = self.hashes.write().map_err(write_error)?;
        let hash = hashes.entry(key.to_string()).or_default();

        if let Some(existing) = hash.get(field) {
            return Ok(Some(existing.clone()));
        }

        hash.insert(field.to_string(), value.to_string());
        Ok(None)
    }

    async fn delete(&self, key: &str, field: &str) -> Result<(), DomainError> {
        let mut hashes = self.hashes.write().map_err(write_error)?;

        if let Some(hash) = hashes.get_mut(key) {
            hash.remove(field);
            if hash.is_empty() {
                hashes.remove(key);
            }
        }

        Ok(())
    }

    async fn exists(&self, key: &str, field: &str) -> Result<bool, DomainError> {
        let hashes = self.hashes.read().map_err(read_error)?;
        Ok(hashes.get(key).is_some_and(|hash| hash.contains_key(field)))
    }

    async fn increment(&self, key: &str, field: &str, by: i64) -> Result<i64, DomainError> {
        let mut hashes = self.hashes.write().map_err(write_error)?;
        let hash = hashes.entry(key.to_string()).or_default();

        let current = match hash.get(field) {
            Some(raw) => raw.parse::<i64>().map_err(|e| {
                DomainError::validation(format!("Field '{}' of '{}' is not an integer: {}", field, key, e))
            })?,
            None => 0,
        };

        let value = current + by;
        hash.insert(field.to_string(), value.to_string());
        Ok(value)
    }

    async fn persisted(&self, key: &str) -> Result<bool, DomainError> {
        let hashes = self.hashes.read().map_err(read_error)?;
        Ok(hashes.get(key).is_some_and(|hash| !hash.is_empty()))
    }

    async fn destroy(&self, key: &str) -> Result<(), DomainError> {
        let mut hashes = self.hashes.write().map_err(write_error)?;
        hashes.remove(key);
        Ok(())
    }
}

// ============================================================================
// InMemoryParticipantStore
// ============================================================================

/// Key/value bag of one participant; clones share the same bag
#[derive(Debug, Clone, Default)]
pub struct InMemoryParticipantStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryParticipantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ParticipantStore for InMemoryParticipantStore {
    async fn get(&self, key: &str) -> Result<Option<String>, DomainError> {
        let entries = self.entries.read().map_err(read_error)?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DomainError> {
        let mut entries = self.entries.write().map_err(write_error)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DomainError> {
        let mut entries = self.entries.write().map_err(write_error)?;
        entries.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, DomainError> {
        let entries = self.entries.read().map_err(read_error)?;
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn contains_key(&self, key: &str) -> Result<bool, DomainError> {
        let entries = self.entries.read().map_err(read_error)?;
        Ok(entries.contains_key(key))
    }

    async fn to_map(&self) -> Result<HashMap<String, String>, DomainError> {
        let entries = self.entries.read().map_err(read_error)?;
        Ok(entries.clone())
    }
}

/// Participant bags keyed by participant identifier
#[derive(Debug, Default)]
pub struct InMemoryParticipantDirectory {
    participants: RwLock<HashMap<String, InMemoryParticipantStore>>,
}

impl InMemoryParticipantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bag of `participant_id`, created on first use
    pub fn participant(&self, participant_id: &str) -> Result<InMemoryParticipantStore, DomainError> {
        let mut participants = self.participants.write().map_err(write_error)?;
        Ok(participants
            .entry(participant_id.to_string())
            .or_default()
            .clone())
    }
}
