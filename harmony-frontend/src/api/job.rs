//! Job API Handlers
//!
//! HTTP endpoints for reading and canceling asynchronous jobs.

use axum::{
    Json,
    extract::{Path, State},
};
use harmony_core::dto::job::JobStatusResponse;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::auth::CurrentUser;
use crate::service::job_service;

// =============================================================================
// Job Status Endpoints
// =============================================================================

/// GET /jobs/{id}
/// Get the status of one of the caller's jobs
pub async fn get_job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    tracing::debug!("Getting job {} for {}", id, user);

    let job = job_service::get_job_status(state.store.as_ref(), &id, &user).await?;
    Ok(Json(job.into()))
}

/// GET /jobs
/// List the caller's jobs, newest first
pub async fn list_jobs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Vec<JobStatusResponse>>> {
    tracing::debug!("Listing jobs for {}", user);

    let jobs = job_service::list_jobs(state.store.as_ref(), &user).await?;
    Ok(Json(jobs.into_iter().map(Into::into).collect()))
}

/// POST /jobs/{id}/cancel
/// Cancel one of the caller's jobs
pub async fn cancel_job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    tracing::info!("Canceling job {} for {}", id, user);

    let job =
        job_service::cancel_job(state.store.as_ref(), state.invoker.as_ref(), &id, &user).await?;
    Ok(Json(job.into()))
}
