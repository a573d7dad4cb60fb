//! Job DTOs
//!
//! Wire representation of a job as returned by the status endpoints.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{Job, JobLink, JobStatus};

/// Job status as exposed to its owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub id: Uuid,
    /// Serialized name of the job owner
    pub username: String,
    pub status: JobStatus,
    pub message: String,
    pub progress: i32,
    pub links: Vec<JobLink>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        JobStatusResponse {
            status: job.status(),
            message: job.message().to_string(),
            progress: job.progress(),
            links: job.links().to_vec(),
            id: job.id,
            username: job.owner,
        }
    }
}
