//! In-memory job store
//!
//! Used when no database is configured and in tests. A single lock guards
//! the map, so every call is atomic with respect to the others.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use harmony_core::domain::job::{Job, JobUpdate};
use uuid::Uuid;

use super::{JobStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    unavailable: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail as if the backing database were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn jobs(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, Job>>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        self.jobs
            .lock()
            .map_err(|_| StoreError::Unavailable("job store lock poisoned".to_string()))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> Result<Uuid, StoreError> {
        let mut jobs = self.jobs()?;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(job.id)
    }

    async fn get(&self, id: Uuid, requester: &str) -> Result<Job, StoreError> {
        let jobs = self.jobs()?;
        match jobs.get(&id) {
            Some(job) if job.is_owned_by(requester) => Ok(job.clone()),
            _ => Err(StoreError::NotFound(id)),
        }
    }

    async fn list_for_owner(&self, owner: &str) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs()?;
        let mut owned: Vec<Job> = jobs
            .values()
            .filter(|job| job.is_owned_by(owner))
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    async fn update_status(&self, id: Uuid, update: JobUpdate) -> Result<Job, StoreError> {
        let mut jobs = self.jobs()?;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        // Work on a copy so a rejected transition leaves the stored job untouched
        let mut updated = job.clone();
        updated
            .apply(update)
            .map_err(|source| StoreError::InvalidTransition { id, source })?;
        *job = updated.clone();

        tracing::debug!("Job {} is now {}", id, updated.status());
        Ok(updated)
    }
}
