//! Request authentication
//!
//! The frontend sits behind an auth proxy that puts the logged-in username in
//! a trusted header. Requests without one are sent to the login provider with
//! a cookie recording where to return afterwards.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderName, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use url::Url;

use crate::api::AppState;

/// Owner recorded for unauthenticated map requests
pub const ANONYMOUS: &str = "anonymous";

/// Cookie holding the path to return to after login
pub const REDIRECT_COOKIE: &str = "redirect";

/// Identifies the caller of a request
pub trait Authenticator: Send + Sync {
    fn username(&self, parts: &Parts) -> Option<String>;
}

/// Trusts a username header set by the auth proxy in front of the frontend
#[derive(Debug, Clone)]
pub struct TrustedHeaderAuthenticator {
    header: HeaderName,
}

impl TrustedHeaderAuthenticator {
    pub fn new(header: &str) -> anyhow::Result<Self> {
        let header = HeaderName::from_bytes(header.to_ascii_lowercase().as_bytes())?;
        Ok(Self { header })
    }
}

impl Authenticator for TrustedHeaderAuthenticator {
    fn username(&self, parts: &Parts) -> Option<String> {
        parts
            .headers
            .get(&self.header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }
}

/// Redirect to the login provider's authorization endpoint
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    location: String,
}

impl LoginRedirect {
    pub fn new(oauth_host: &str, client_id: &str, callback_root: &str) -> anyhow::Result<Self> {
        let redirect_uri = format!("{}/oauth2/redirect", callback_root.trim_end_matches('/'));
        let location = Url::parse_with_params(
            &format!("{}/oauth/authorize", oauth_host.trim_end_matches('/')),
            &[
                ("client_id", client_id),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri.as_str()),
            ],
        )?;

        Ok(Self {
            location: location.into(),
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Sends the caller to log in, remembering `original` for afterwards
    pub fn response(&self, original: &Uri) -> Response {
        let path = original
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let encoded: String = url::form_urlencoded::byte_serialize(path.as_bytes()).collect();
        let cookie = format!("{}={}; Path=/; HttpOnly", REDIRECT_COOKIE, encoded);

        (
            StatusCode::TEMPORARY_REDIRECT,
            [
                (header::LOCATION, self.location.clone()),
                (header::SET_COOKIE, cookie),
            ],
        )
            .into_response()
    }
}

/// The authenticated caller. Rejects with a login redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub String);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match state.auth.username(parts) {
            Some(username) => Ok(CurrentUser(username)),
            None => {
                tracing::debug!("Unauthenticated request for {}, redirecting to login", parts.uri);
                Err(state.login.response(&parts.uri))
            }
        }
    }
}

/// The caller if authenticated, otherwise [`ANONYMOUS`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUser(pub String);

impl FromRequestParts<AppState> for RequestUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let username = state
            .auth
            .username(parts)
            .unwrap_or_else(|| ANONYMOUS.to_string());
        Ok(RequestUser(username))
    }
}
