//! # Persistence
//!
//! Durable storage for Tasks, Execution Handles, Jobs and Conditions.
//!
//! ## Key Components
//!
//! - [`store`] - The async [`Store`] trait every backend implements
//! - [`memory`] - [`InMemoryStore`] for tests and embedding
//! - [`postgres`] - [`PgStore`] over a sqlx connection pool
//!
//! ## Concurrency Control
//!
//! Task and Job rows carry a `version`. Updates are compare-and-swap on that
//! version and fail with [`PersistenceError::ConcurrentModification`] when
//! another writer got there first; callers re-read and retry.

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::InMemoryStore;
pub use postgres::{PgStore, MIGRATOR};
pub use store::Store;

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{entity} {id} was modified concurrently")]
    ConcurrentModification { entity: &'static str, id: Uuid },

    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("{entity} {id} is still referenced")]
    StillReferenced { entity: &'static str, id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stored value: {0}")]
    Decode(String),
}

impl PersistenceError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
