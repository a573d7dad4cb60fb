//! In-process execution
//!
//! Backends implemented as library calls inside the frontend. They report
//! through the same callback registry as spawned processes.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use harmony_core::domain::operation::Operation;
use tracing::warn;

use super::worker::{DispatchContext, Worker};
use crate::service::callback::BackendMessage;

/// Returns the operation it was given as JSON
pub const ECHO: &str = "echo";
/// Returns links to the unprocessed source granules
pub const NOOP: &str = "noop";

#[async_trait]
pub trait LocalService: Send + Sync {
    async fn call(&self, operation: &Operation) -> BackendMessage;
}

/// Looks up a built-in service by name
pub fn local_service(name: &str) -> Option<Arc<dyn LocalService>> {
    match name {
        ECHO => Some(Arc::new(EchoService)),
        NOOP => Some(Arc::new(NoOpService)),
        _ => None,
    }
}

/// Runs `service` on its own task
pub fn spawn(service: Arc<dyn LocalService>, ctx: &DispatchContext) -> Worker {
    let request_id = ctx.request_id;
    let operation = ctx.operation.clone();
    let callbacks = ctx.callbacks.clone();

    Worker::task(tokio::spawn(async move {
        let message = service.call(&operation).await;
        if let Err(e) = callbacks.deliver(request_id, message).await {
            warn!("In-process service result was not delivered: {}", e);
        }
    }))
}

struct EchoService;

#[async_trait]
impl LocalService for EchoService {
    async fn call(&self, operation: &Operation) -> BackendMessage {
        match serde_json::to_vec(operation) {
            Ok(json) => {
                BackendMessage::payload(Some("application/json".to_string()), Body::from(json))
            }
            Err(e) => BackendMessage::Error(format!("Unable to encode operation: {}", e)),
        }
    }
}

struct NoOpService;

#[async_trait]
impl LocalService for NoOpService {
    async fn call(&self, operation: &Operation) -> BackendMessage {
        let links = operation.granule_urls();
        if links.is_empty() {
            return BackendMessage::Error("No granule data links were found.".to_string());
        }

        BackendMessage::Completed {
            links,
            message: Some("Returned links to unprocessed granules".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_operation;

    #[tokio::test]
    async fn test_echo_returns_operation_json() {
        let operation = sample_operation();
        let echo = local_service(ECHO).unwrap();

        match echo.call(&operation).await {
            BackendMessage::Payload {
                content_type, body, ..
            } => {
                assert_eq!(content_type.as_deref(), Some("application/json"));
                let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
                let decoded: Operation = serde_json::from_slice(&bytes).unwrap();
                assert_eq!(decoded, operation);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_noop_links_source_granules() {
        let operation = sample_operation();
        let noop = local_service(NOOP).unwrap();

        match noop.call(&operation).await {
            BackendMessage::Completed { links, .. } => {
                assert_eq!(links, operation.granule_urls());
                assert!(!links.is_empty());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_noop_without_links_is_an_error() {
        let mut operation = sample_operation();
        for source in &mut operation.sources {
            for granule in &mut source.granules {
                granule.url = None;
            }
        }

        let noop = local_service(NOOP).unwrap();
        assert!(matches!(noop.call(&operation).await, BackendMessage::Error(_)));
    }

    #[test]
    fn test_unknown_service() {
        assert!(local_service("gdal").is_none());
    }
}
