//! API Module
//!
//! HTTP API layer for the frontend.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;
pub mod service;
pub mod wms;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::auth::{Authenticator, LoginRedirect};
use crate::catalog::Catalog;
use crate::repository::JobStore;
use crate::service::callback::CallbackRegistry;
use crate::service::invoker::ServiceInvoker;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub catalog: Arc<dyn Catalog>,
    pub invoker: Arc<ServiceInvoker>,
    pub callbacks: CallbackRegistry,
    pub auth: Arc<dyn Authenticator>,
    pub login: Arc<LoginRedirect>,
    pub default_granule_limit: u32,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job endpoints
        .route("/jobs", get(job::list_jobs))
        .route("/jobs/{id}", get(job::get_job))
        .route("/jobs/{id}/cancel", post(job::cancel_job))
        // Backend callbacks
        .route(
            "/service/{request_id}/response",
            post(service::service_response),
        )
        // Protocol endpoints
        .route("/{collection_id}/wms", get(wms::get_map))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
