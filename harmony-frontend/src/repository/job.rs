//! Job Repository
//!
//! Postgres-backed job store. Updates lock the row, run the core state machine
//! and write the result back inside one transaction.

use async_trait::async_trait;
use harmony_core::domain::job::{Job, JobLink, JobStatus, JobUpdate, StoredJob};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{JobStore, StoreError};

const JOB_COLUMNS: &str =
    "id, username, status, message, progress, links, created_at, updated_at";

/// Job store backed by a Postgres pool
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_for_update(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = $1 FOR UPDATE",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(Job::try_from).transpose()
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &Job) -> Result<Uuid, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, username, status, message, progress, links, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id)
        .bind(&job.owner)
        .bind(job.status().as_str())
        .bind(job.message())
        .bind(job.progress())
        .bind(links_to_json(job.links())?)
        .bind(job.created_at)
        .bind(job.updated_at())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(job.id));
        }

        tx.commit().await?;
        Ok(job.id)
    }

    async fn get(&self, id: Uuid, requester: &str) -> Result<Job, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        match row.map(Job::try_from).transpose()? {
            Some(job) if job.is_owned_by(requester) => Ok(job),
            _ => Err(StoreError::NotFound(id)),
        }
    }

    async fn list_for_owner(&self, owner: &str) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE username = $1 ORDER BY created_at DESC",
            JOB_COLUMNS
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn update_status(&self, id: Uuid, update: JobUpdate) -> Result<Job, StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut job = Self::find_for_update(&mut tx, id)
            .await?
            .ok_or(StoreError::NotFound(id))?;

        job.apply(update)
            .map_err(|source| StoreError::InvalidTransition { id, source })?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, message = $2, progress = $3, links = $4, updated_at = $5
            WHERE id = $6
            "#,
        )
        .bind(job.status().as_str())
        .bind(job.message())
        .bind(job.progress())
        .bind(links_to_json(job.links())?)
        .bind(job.updated_at())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!("Job {} is now {}", id, job.status());
        Ok(job)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn links_to_json(links: &[JobLink]) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(links).map_err(|e| StoreError::Corrupt(e.to_string()))
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    username: String,
    status: String,
    message: String,
    progress: i32,
    links: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("job {}: {}", row.id, e)))?;

        let links: Vec<JobLink> = serde_json::from_value(row.links)
            .map_err(|e| StoreError::Corrupt(format!("job {}: {}", row.id, e)))?;

        Ok(Job::from(StoredJob {
            id: row.id,
            owner: row.username,
            status,
            message: row.message,
            progress: row.progress,
            links,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }
}
