//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::service::job_service::JobError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    /// Public message, then the internal detail that is only logged
    Server(String, String),
}

/// Error body returned to clients
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub description: String,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "harmony:NotFoundError",
            ApiError::BadRequest(_) => "harmony:BadRequestError",
            ApiError::Server(..) => "harmony:ServerError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Server(..) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match self {
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) => msg,
            ApiError::Server(msg, detail) => {
                tracing::error!("{}: {}", msg, detail);
                msg
            }
        };

        let body = ErrorBody {
            code,
            description: format!("Error: {}", message),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::InvalidId(_) | JobError::AlreadyFinished(_) => {
                ApiError::BadRequest(err.to_string())
            }
            JobError::NotFound(_) => ApiError::NotFound(err.to_string()),
            JobError::Store { id, ref source } => ApiError::Server(
                format!(
                    "Internal server error trying to retrieve job status for job {}",
                    id
                ),
                source.to_string(),
            ),
            JobError::List(ref source) => ApiError::Server(
                "Internal server error trying to list jobs".to_string(),
                source.to_string(),
            ),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Rejection body used by protocol adapters
#[derive(Debug, Serialize)]
pub struct AdapterErrors {
    pub errors: Vec<String>,
}

impl AdapterErrors {
    pub fn single(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
        }
    }
}

impl IntoResponse for AdapterErrors {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}
