//! Repository Module
//!
//! Data access layer for the frontend.
//! Job persistence sits behind the [`JobStore`] trait so the Postgres store
//! and the in-memory store are interchangeable.

pub mod job;
pub mod memory;

use async_trait::async_trait;
use harmony_core::domain::job::{Job, JobUpdate, TransitionError};
use thiserror::Error;
use uuid::Uuid;

pub use job::PgJobStore;
pub use memory::MemoryJobStore;

/// Job store error type
#[derive(Debug, Error)]
pub enum StoreError {
    /// No job with this id, or the requester does not own it
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {0} already exists")]
    Conflict(Uuid),

    #[error("invalid transition for job {id}: {source}")]
    InvalidTransition {
        id: Uuid,
        #[source]
        source: TransitionError,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt job record: {0}")]
    Corrupt(String),

    #[error("job store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// True for faults of the persistence layer itself, as opposed to contract errors
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            StoreError::Database(_) | StoreError::Corrupt(_) | StoreError::Unavailable(_)
        )
    }
}

/// Transactional job persistence
///
/// Each call runs in its own short transaction; calls for the same id never
/// observe a partially written job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new job, failing with [`StoreError::Conflict`] if the id is taken
    async fn create(&self, job: &Job) -> Result<Uuid, StoreError>;

    /// Loads a job visible to `requester`. Missing and foreign jobs are indistinguishable.
    async fn get(&self, id: Uuid, requester: &str) -> Result<Job, StoreError>;

    /// Lists the jobs owned by `owner`, newest first
    async fn list_for_owner(&self, owner: &str) -> Result<Vec<Job>, StoreError>;

    /// Applies a state transition atomically and returns the updated job
    async fn update_status(&self, id: Uuid, update: JobUpdate) -> Result<Job, StoreError>;
}
