//! Backend Callback Handlers
//!
//! Endpoint spawned backends use to report results for a request.

use axum::{
    body::Body,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, StatusCode, header},
};
use uuid::Uuid;

use crate::adapter::QueryParams;
use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::callback::{BackendMessage, relay_body};
use crate::service::invoker::FAILED_MESSAGE;

/// POST /service/{request_id}/response
/// Accept a report from the backend handling a request
///
/// Query parameters select the kind of report: `error`, `redirect`,
/// `progress`, or `status` with repeated `link`s. Without any of them the
/// request body is the result itself, and this call completes once the body
/// has been relayed to the original caller.
pub async fn service_response(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<StatusCode> {
    let request_id = Uuid::parse_str(&request_id).map_err(|_| {
        ApiError::BadRequest(format!("requestId {} is in invalid format.", request_id))
    })?;

    if !state.callbacks.is_registered(request_id) {
        return Err(unknown_request(request_id));
    }

    let params = QueryParams::parse(query.as_deref());
    let message = match parse_report(&params)? {
        Some(message) => message,
        None => {
            let content_type = headers
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let (body, relayed) = relay_body(body);

            tracing::debug!("Relaying payload for request {}", request_id);
            let message = BackendMessage::Payload {
                content_type,
                body,
                relayed: relayed.clone(),
            };
            state
                .callbacks
                .deliver(request_id, message)
                .await
                .map_err(|_| unknown_request(request_id))?;

            // Resolves once the caller has read the body, or given up on it
            relayed.finished().await;
            return Ok(StatusCode::OK);
        }
    };

    tracing::debug!("Backend report for request {}: {:?}", request_id, message);
    state
        .callbacks
        .deliver(request_id, message)
        .await
        .map_err(|_| unknown_request(request_id))?;

    Ok(StatusCode::OK)
}

fn unknown_request(request_id: Uuid) -> ApiError {
    ApiError::NotFound(format!("Unable to find request {}", request_id))
}

/// Reads a report from query parameters. `None` means the body is the result.
fn parse_report(params: &QueryParams) -> ApiResult<Option<BackendMessage>> {
    if let Some(error) = params.get("error") {
        return Ok(Some(BackendMessage::Error(error.to_string())));
    }

    if let Some(url) = params.get("redirect") {
        return Ok(Some(BackendMessage::Redirect(url.to_string())));
    }

    let message = params.get("message").map(str::to_string);
    let links: Vec<String> = params.get_all("link").map(str::to_string).collect();

    match params.get("status") {
        Some(status) if status.eq_ignore_ascii_case("successful") => {
            return Ok(Some(BackendMessage::Completed { links, message }));
        }
        Some(status) if status.eq_ignore_ascii_case("failed") => {
            let message = message.unwrap_or_else(|| FAILED_MESSAGE.to_string());
            return Ok(Some(BackendMessage::Error(message)));
        }
        Some(status) => {
            return Err(ApiError::BadRequest(format!(
                "Invalid \"status\" parameter \"{}\": expected successful or failed",
                status
            )));
        }
        None => {}
    }

    if let Some(raw) = params.get("progress") {
        let progress = match raw.parse::<i32>() {
            Ok(value) if (0..=100).contains(&value) => value,
            _ => {
                return Err(ApiError::BadRequest(format!(
                    "Invalid \"progress\" parameter \"{}\": must be an integer from 0 to 100",
                    raw
                )));
            }
        };
        return Ok(Some(BackendMessage::Progress { progress, message }));
    }

    if !links.is_empty() {
        return Ok(Some(BackendMessage::Completed { links, message }));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestApp, body_json};
    use axum::http::Request;
    use serde_json::json;

    fn callback(id: Uuid, query: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/service/{}/response{}", id, query))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_error_report() {
        let app = TestApp::new();
        let id = Uuid::new_v4();
        let mut registration = app.callbacks.register(id);

        let response = app
            .request(callback(id, "?error=Something%20bad%20happened"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        match registration.recv().await {
            Some(BackendMessage::Error(message)) => assert_eq!(message, "Something bad happened"),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_redirect_report_is_decoded_once() {
        let app = TestApp::new();
        let id = Uuid::new_v4();
        let mut registration = app.callbacks.register(id);

        app.request(callback(
            id,
            "?redirect=https%3A%2F%2Fdata.example.com%2Fout.tif%3Fsig%3Da%252Fb",
        ))
        .await;

        match registration.recv().await {
            Some(BackendMessage::Redirect(url)) => {
                assert_eq!(url, "https://data.example.com/out.tif?sig=a%2Fb")
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_progress_and_completion_reports() {
        let app = TestApp::new();
        let id = Uuid::new_v4();
        let mut registration = app.callbacks.register(id);

        app.request(callback(id, "?progress=40&message=Working")).await;
        app.request(callback(
            id,
            "?status=successful&link=https%3A%2F%2Fa.tif&link=https%3A%2F%2Fb.tif",
        ))
        .await;

        match registration.recv().await {
            Some(BackendMessage::Progress { progress, message }) => {
                assert_eq!(progress, 40);
                assert_eq!(message.as_deref(), Some("Working"));
            }
            other => panic!("unexpected message {:?}", other),
        }
        match registration.recv().await {
            Some(BackendMessage::Completed { links, .. }) => {
                assert_eq!(links, vec!["https://a.tif", "https://b.tif"]);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_payload_report_waits_for_relay() {
        let app = TestApp::new();
        let id = Uuid::new_v4();
        let mut registration = app.callbacks.register(id);

        let request = Request::builder()
            .method("POST")
            .uri(format!("/service/{}/response", id))
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::from("realistic mock data"))
            .unwrap();
        let pending = tokio::spawn({
            let app = app.clone();
            async move { app.request(request).await }
        });

        match registration.recv().await {
            Some(BackendMessage::Payload {
                content_type, body, ..
            }) => {
                assert_eq!(content_type.as_deref(), Some("image/png"));
                let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
                assert_eq!(&bytes[..], b"realistic mock data");
            }
            other => panic!("unexpected message {:?}", other),
        }

        let response = pending.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_request() {
        let app = TestApp::new();
        let id = Uuid::new_v4();

        let response = app.request(callback(id, "?error=late")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            json!({
                "code": "harmony:NotFoundError",
                "description": format!("Error: Unable to find request {}", id)
            })
        );
    }

    #[tokio::test]
    async fn test_malformed_reports() {
        let app = TestApp::new();
        let id = Uuid::new_v4();
        let _registration = app.callbacks.register(id);

        for query in ["?progress=150", "?progress=abc", "?status=pending"] {
            let response = app.request(callback(id, query)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", query);
        }

        let response = app
            .request(
                Request::builder()
                    .method("POST")
                    .uri("/service/not-a-uuid/response?error=x")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
