//! Store adapter traits

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Hash store holding experiment state and variant counters
///
/// Every key is a hash of string fields. Counters change only through
/// [`ExperimentStore::increment`], which must be atomic.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExperimentStore: Send + Sync {
    /// Gets a field value
    async fn get(&self, key: &str, field: &str) -> Result<Option<String>, DomainError>;

    /// Gets every field of a key in one round trip
    async fn get_all(&self, key: &str) -> Result<HashMap<String, String>, DomainError>;

    /// Sets a field value
    async fn set(&self, key: &str, field: &str, value: &str) -> Result<(), DomainError>;

    /// Sets a field only if absent, returning the existing value when there was one
    async fn setnx(&self, key: &str, field: &str, value: &str)
    -> Result<Option<String>, DomainError>;

    /// Removes a field
    async fn delete(&self, key: &str, field: &str) -> Result<(), DomainError>;

    /// Checks whether a field is set
    async fn exists(&self, key: &str, field: &str) -> Result<bool, DomainError>;

    /// Atomically adds `by` to an integer field, returning the new value
    async fn increment(&self, key: &str, field: &str, by: i64) -> Result<i64, DomainError>;

    /// Checks whether the key holds any field
    async fn persisted(&self, key: &str) -> Result<bool, DomainError>;

    /// Removes the key with all its fields
    async fn destroy(&self, key: &str) -> Result<(), DomainError>;
}

/// Typed accessors over [`ExperimentStore`]
pub trait ExperimentStoreExt: ExperimentStore {
    /// Gets an RFC 3339 timestamp field
    fn get_timestamp<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
    ) -> impl std::future::Future<Output = Result<Option<DateTime<Utc>>, DomainError>> + Send {
        async move {
            match self.get(key, field).await? {
                Some(raw) => parse_timestamp(field, &raw).map(Some),
                None => Ok(None),
            }
        }
    }

    /// Sets an RFC 3339 timestamp field
    fn set_timestamp<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), DomainError>> + Send {
        async move { self.set(key, field, &at.to_rfc3339()).await }
    }

    /// Gets an integer counter, zero when unset
    fn get_counter<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
    ) -> impl std::future::Future<Output = Result<u64, DomainError>> + Send {
        async move {
            match self.get(key, field).await? {
                Some(raw) => parse_counter(field, &raw),
                None => Ok(0),
            }
        }
    }
}

impl<T: ExperimentStore + ?Sized> ExperimentStoreExt for T {}

/// Parse a stored RFC 3339 timestamp
pub fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, DomainError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| DomainError::internal(format!("Invalid timestamp in '{}': {}", field, e)))
}

/// Parse a stored counter; negative values read as zero
pub fn parse_counter(field: &str, raw: &str) -> Result<u64, DomainError> {
    raw.parse::<i64>()
        .map(|value| value.max(0) as u64)
        .map_err(|e| DomainError::internal(format!("Invalid counter in '{}': {}", field, e)))
}

/// Per-participant key/value bag
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ParticipantStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, DomainError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), DomainError>;

    async fn delete(&self, key: &str) -> Result<(), DomainError>;

    async fn keys(&self) -> Result<Vec<String>, DomainError>;

    async fn contains_key(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn to_map(&self) -> Result<HashMap<String, String>, DomainError>;
}
