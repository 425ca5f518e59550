//! Store infrastructure - in-memory and Redis adapters

mod factory;
mod identity;
mod in_memory;
mod redis;

pub use factory::{StoreConfig, StoreFactory, StoreType, Stores};
pub use identity::{IdentityStrategy, ParticipantContext, ParticipantResolver};
pub use in_memory::{InMemoryExperimentStore, InMemoryParticipantDirectory, InMemoryParticipantStore};
pub use self::redis::{RedisExperimentStore, RedisParticipantStore, RedisStoreConfig};
