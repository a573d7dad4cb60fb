//! Job Service
//!
//! Read and cancel paths for asynchronous jobs. External job ids are
//! validated here before any lookup.

use harmony_core::domain::job::{Job, JobUpdate, TransitionError};
use thiserror::Error;
use uuid::Uuid;

use crate::repository::{JobStore, StoreError};
use crate::service::invoker::ServiceInvoker;

/// Service error type
#[derive(Debug, Error)]
pub enum JobError {
    #[error("jobId {0} is in invalid format.")]
    InvalidId(String),

    /// Missing, or owned by someone else
    #[error("Unable to find job {0}")]
    NotFound(Uuid),

    #[error("Job {0} has already finished and cannot be canceled")]
    AlreadyFinished(Uuid),

    #[error("job store failure for job {id}: {source}")]
    Store {
        id: Uuid,
        #[source]
        source: StoreError,
    },

    #[error("job store failure listing jobs: {0}")]
    List(#[source] StoreError),
}

impl JobError {
    fn from_store(id: Uuid, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => JobError::NotFound(id),
            StoreError::InvalidTransition {
                source: TransitionError::Terminal { .. },
                ..
            } => JobError::AlreadyFinished(id),
            source => JobError::Store { id, source },
        }
    }
}

/// Parses an externally supplied job id
pub fn parse_job_id(raw: &str) -> Result<Uuid, JobError> {
    Uuid::parse_str(raw).map_err(|_| JobError::InvalidId(raw.to_string()))
}

/// Get a job's status as seen by `requester`
pub async fn get_job_status(
    store: &dyn JobStore,
    raw_id: &str,
    requester: &str,
) -> Result<Job, JobError> {
    let id = parse_job_id(raw_id)?;
    let job = store
        .get(id, requester)
        .await
        .map_err(|e| JobError::from_store(id, e))?;

    Ok(job)
}

/// List the jobs owned by `owner`, newest first
pub async fn list_jobs(store: &dyn JobStore, owner: &str) -> Result<Vec<Job>, JobError> {
    store.list_for_owner(owner).await.map_err(JobError::List)
}

/// Cancel a job
///
/// The canceled status is recorded before the backend is told to stop, so
/// the job ends up canceled even if the backend ignores the signal.
pub async fn cancel_job(
    store: &dyn JobStore,
    invoker: &ServiceInvoker,
    raw_id: &str,
    requester: &str,
) -> Result<Job, JobError> {
    let id = parse_job_id(raw_id)?;
    let job = store
        .get(id, requester)
        .await
        .map_err(|e| JobError::from_store(id, e))?;

    if job.status().is_terminal() {
        return Err(JobError::AlreadyFinished(id));
    }

    let job = store
        .update_status(id, JobUpdate::canceled())
        .await
        .map_err(|e| JobError::from_store(id, e))?;

    tracing::info!("Job {} canceled by {}", id, requester);

    if !invoker.cancel(id) {
        tracing::debug!("No backend was running for job {}", id);
    }

    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryJobStore;
    use crate::service::callback::CallbackRegistry;
    use crate::service::invoker::ServiceRegistry;
    use harmony_core::domain::job::JobStatus;
    use std::sync::Arc;
    use std::time::Duration;

    async fn store_with_job(owner: &str) -> (Arc<MemoryJobStore>, Job) {
        let store = Arc::new(MemoryJobStore::new());
        let job = Job::new(owner);
        store.create(&job).await.unwrap();
        (store, job)
    }

    fn invoker(store: Arc<MemoryJobStore>) -> ServiceInvoker {
        ServiceInvoker::new(
            ServiceRegistry::default_services(),
            store,
            CallbackRegistry::new(),
            "http://localhost:3000",
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_get_job_status() {
        let (store, job) = store_with_job("joe").await;
        let found = get_job_status(store.as_ref(), &job.id.to_string(), "joe")
            .await
            .unwrap();
        assert_eq!(found, job);
    }

    #[tokio::test]
    async fn test_invalid_id_is_rejected_before_lookup() {
        let store = MemoryJobStore::new();
        store.set_unavailable(true);

        let err = get_job_status(&store, "not-a-uuid", "joe").await.unwrap_err();
        assert!(matches!(&err, JobError::InvalidId(raw) if raw == "not-a-uuid"));
        assert_eq!(err.to_string(), "jobId not-a-uuid is in invalid format.");
    }

    #[tokio::test]
    async fn test_foreign_job_looks_missing() {
        let (store, job) = store_with_job("joe").await;

        let foreign = get_job_status(store.as_ref(), &job.id.to_string(), "jill")
            .await
            .unwrap_err();
        let missing_id = Uuid::new_v4();
        let missing = get_job_status(store.as_ref(), &missing_id.to_string(), "jill")
            .await
            .unwrap_err();

        assert!(matches!(foreign, JobError::NotFound(id) if id == job.id));
        assert!(matches!(missing, JobError::NotFound(id) if id == missing_id));
    }

    #[tokio::test]
    async fn test_store_fault_is_reported() {
        let (store, job) = store_with_job("joe").await;
        store.set_unavailable(true);

        let err = get_job_status(store.as_ref(), &job.id.to_string(), "joe")
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Store { id, .. } if id == job.id));
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let (store, job) = store_with_job("joe").await;
        store.update_status(job.id, JobUpdate::running()).await.unwrap();
        let invoker = invoker(store.clone());

        let canceled = cancel_job(store.as_ref(), &invoker, &job.id.to_string(), "joe")
            .await
            .unwrap();
        assert_eq!(canceled.status(), JobStatus::Canceled);
        assert_eq!(
            store.get(job.id, "joe").await.unwrap().status(),
            JobStatus::Canceled
        );
    }

    #[tokio::test]
    async fn test_cancel_finished_job() {
        let (store, job) = store_with_job("joe").await;
        store.update_status(job.id, JobUpdate::running()).await.unwrap();
        store
            .update_status(job.id, JobUpdate::failed("boom"))
            .await
            .unwrap();
        let invoker = invoker(store.clone());

        let err = cancel_job(store.as_ref(), &invoker, &job.id.to_string(), "joe")
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::AlreadyFinished(id) if id == job.id));
        assert_eq!(
            err.to_string(),
            format!("Job {} has already finished and cannot be canceled", job.id)
        );
    }

    #[tokio::test]
    async fn test_cancel_foreign_job() {
        let (store, job) = store_with_job("joe").await;
        let invoker = invoker(store.clone());

        let err = cancel_job(store.as_ref(), &invoker, &job.id.to_string(), "jill")
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::NotFound(_)));
        assert_eq!(
            store.get(job.id, "joe").await.unwrap().status(),
            JobStatus::Created
        );
    }

    #[tokio::test]
    async fn test_list_jobs() {
        let (store, job) = store_with_job("joe").await;
        store.create(&Job::new("jill")).await.unwrap();

        let jobs = list_jobs(store.as_ref(), "joe").await.unwrap();
        assert_eq!(jobs, vec![job]);
    }
}
