//! Participant identity resolution
//!
//! A participant store is resolved per request from whatever identity the
//! caller can supply. Each strategy needs a capability of the request context;
//! when it is missing resolution fails with `UnsupportedContext`.

use std::fmt;
use std::sync::Arc;

use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::store::ParticipantStore;
use crate::domain::DomainError;

use super::in_memory::{InMemoryParticipantDirectory, InMemoryParticipantStore};
use super::redis::{RedisParticipantStore, RedisStoreConfig};

/// How a participant is identified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStrategy {
    /// Fresh, unpersisted bag per request
    Anonymous,
    /// Keyed by the session identifier
    Session,
    /// Keyed by the authenticated user identifier
    #[default]
    UserId,
    /// Session bag until a user identifier is known, then merged into the user's bag
    Unity,
}

impl fmt::Display for IdentityStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::Session => write!(f, "session"),
            Self::UserId => write!(f, "user_id"),
            Self::Unity => write!(f, "unity"),
        }
    }
}

impl std::str::FromStr for IdentityStrategy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anonymous" => Ok(Self::Anonymous),
            "session" => Ok(Self::Session),
            "user_id" | "user" => Ok(Self::UserId),
            "unity" => Ok(Self::Unity),
            _ => Err(DomainError::configuration(format!(
                "Unknown identity strategy: {}. Valid strategies: anonymous, session, user_id, unity",
                s
            ))),
        }
    }
}

/// Identity capabilities available in the current request
#[derive(Debug, Clone, Default)]
pub struct ParticipantContext {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl ParticipantContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Where participant bags are kept
#[derive(Clone)]
pub(crate) enum ParticipantBackend {
    InMemory(Arc<InMemoryParticipantDirectory>),
    Redis(ConnectionManager, RedisStoreConfig),
}

impl fmt::Debug for ParticipantBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InMemory(_) => write!(f, "InMemory"),
            Self::Redis(_, config) => f.debug_tuple("Redis").field(config).finish(),
        }
    }
}

/// Resolves the participant store of a request
#[derive(Debug, Clone)]
pub struct ParticipantResolver {
    strategy: IdentityStrategy,
    backend: ParticipantBackend,
}

impl ParticipantResolver {
    pub(crate) fn new(strategy: IdentityStrategy, backend: ParticipantBackend) -> Self {
        Self { strategy, backend }
    }

    /// Resolver over a process-local directory
    pub fn in_memory(strategy: IdentityStrategy) -> Self {
        Self::new(
            strategy,
            ParticipantBackend::InMemory(Arc::new(InMemoryParticipantDirectory::new())),
        )
    }

    pub fn strategy(&self) -> IdentityStrategy {
        self.strategy
    }

    fn bag(&self, id: &str) -> Result<Arc<dyn ParticipantStore>, DomainError> {
        match &self.backend {
            ParticipantBackend::InMemory(directory) => Ok(Arc::new(directory.participant(id)?)),
            ParticipantBackend::Redis(connection, config) => Ok(Arc::new(
                RedisParticipantStore::new(connection.clone(), config, id),
            )),
        }
    }

    pub async fn resolve(
        &self,
        context: &ParticipantContext,
    ) -> Result<Arc<dyn ParticipantStore>, DomainError> {
        match self.strategy {
            IdentityStrategy::Anonymous => Ok(Arc::new(InMemoryParticipantStore::new())),
            IdentityStrategy::Session => {
                let session = context
                    .session_id
                    .as_deref()
                    .ok_or_else(|| DomainError::unsupported_context("session"))?;
                self.bag(&format!("session:{}", session))
            }
            IdentityStrategy::UserId => {
                let user = context
                    .user_id
                    .as_deref()
                    .ok_or_else(|| DomainError::unsupported_context("user id"))?;
                self.bag(&format!("user:{}", user))
            }
            IdentityStrategy::Unity => self.resolve_unity(context).await,
        }
    }

    async fn resolve_unity(
        &self,
        context: &ParticipantContext,
    ) -> Result<Arc<dyn ParticipantStore>, DomainError> {
        let session = context
            .session_id
            .as_deref()
            .map(|session| self.bag(&format!("session:{}", session)))
            .transpose()?;

        let Some(user_id) = context.user_id.as_deref() else {
            return session.ok_or_else(|| DomainError::unsupported_context("session or user id"));
        };

        let user = self.bag(&format!("user:{}", user_id))?;

        if let Some(session) = session {
            // Bindings made before sign-in move over unless the user already has one
            for (key, value) in session.to_map().await? {
                if !user.contains_key(&key).await? {
                    user.set(&key, &value).await?;
                }
                session.delete(&key).await?;
            }
            debug!(user_id = %user_id, "Merged session participant into user");
        }

        Ok(user)
    }
}
