//! WMS API Handlers
//!
//! Map requests addressed to a collection. The adapter turns the query into
//! an operation and the invoker's answer is relayed as the response.

use axum::{
    Json,
    extract::{Path, RawQuery, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use harmony_core::dto::job::JobStatusResponse;

use crate::adapter::{AdapterError, QueryParams, wms};
use crate::api::AppState;
use crate::api::error::{AdapterErrors, ApiError};
use crate::auth::RequestUser;
use crate::service::invoker::{Invocation, InvocationResult, InvokeError};

/// GET /{collection_id}/wms
/// Render a map for one variable of a collection
pub async fn get_map(
    State(state): State<AppState>,
    RequestUser(user): RequestUser,
    Path(collection_id): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    let params = QueryParams::parse(query.as_deref());
    tracing::debug!("WMS request on {} from {}", collection_id, user);

    let operation = match wms::build_operation(
        &params,
        &collection_id,
        state.catalog.as_ref(),
        state.default_granule_limit,
    )
    .await
    {
        Ok(operation) => operation,
        Err(AdapterError::BadRequest(message)) => {
            tracing::info!("Rejected WMS request on {}: {}", collection_id, message);
            return AdapterErrors::single(message).into_response();
        }
        Err(AdapterError::Catalog(e)) => {
            return ApiError::Server(
                "Internal server error trying to query the metadata catalog".to_string(),
                e.to_string(),
            )
            .into_response();
        }
    };

    match state.invoker.invoke(operation, &user).await {
        Ok(Invocation::Completed(result)) => result.into_response(),
        Ok(Invocation::Accepted(job)) => {
            (StatusCode::ACCEPTED, Json(JobStatusResponse::from(job))).into_response()
        }
        Err(InvokeError::NoService(collection)) => AdapterErrors::single(format!(
            "No service is configured for collection {}",
            collection
        ))
        .into_response(),
        Err(InvokeError::Store(e)) => ApiError::Server(
            "Internal server error trying to create a job".to_string(),
            e.to_string(),
        )
        .into_response(),
    }
}

impl IntoResponse for InvocationResult {
    fn into_response(self) -> Response {
        match self {
            InvocationResult::Redirect(location) => {
                (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
            }
            InvocationResult::Payload {
                body,
                content_type,
                status,
            } => match content_type {
                Some(content_type) => {
                    (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
                }
                None => (status, body).into_response(),
            },
            InvocationResult::Error { message, status } => (status, message).into_response(),
        }
    }
}
