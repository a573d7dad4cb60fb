//! Service DTOs
//!
//! Messages exchanged between the frontend and backend services.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::operation::Operation;

/// Everything a spawned backend needs to process a request and report back
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationEnvelope {
    pub request_id: Uuid,
    /// URL the backend posts its response to
    pub callback: String,
    pub user: String,
    pub operation: Operation,
}
