//! Request-scoped gateway errors and their JSON rendering
//!
//! Every error response has the shape
//! `{"error":{"type":"...","message":"...","request_id":"req_..."}}`.
//! Startup failures never reach this module: they are
//! `common::Error::Config` and abort boot.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Login(#[from] oauth2_client::Error),

    #[error("authentication required")]
    Unauthorized,

    #[error("access denied")]
    Forbidden,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream timeout after {0}s")]
    UpstreamTimeout(u64),

    #[error("invalid request body: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        use oauth2_client::Error as Login;
        match self {
            GatewayError::Login(e) => match e {
                Login::ProviderDenied { .. } => StatusCode::UNAUTHORIZED,
                Login::InvalidState | Login::MissingParameter(_) => StatusCode::BAD_REQUEST,
                Login::TokenExchangeFailed(_) | Login::Discovery(_) => StatusCode::BAD_GATEWAY,
                Login::NotFound(_) => StatusCode::NOT_FOUND,
            },
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden => StatusCode::FORBIDDEN,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Value of `error.type` in the response body.
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Login(e) => e.kind(),
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::Forbidden => "forbidden",
            GatewayError::Upstream(_) => "upstream_error",
            GatewayError::UpstreamTimeout(_) => "upstream_timeout",
            GatewayError::InvalidRequest(_) => "invalid_request",
        }
    }

    pub fn to_response(&self, request_id: &str) -> Response {
        let message = match self {
            // Include the provider's description when it sent one
            GatewayError::Login(oauth2_client::Error::ProviderDenied {
                error,
                description: Some(description),
            }) => format!("authorization denied by provider: {error} ({description})"),
            other => other.to_string(),
        };
        error_response(self.status(), self.error_type(), &message, request_id)
    }
}

/// JSON error response: {"error":{"type":"...","message":"...","request_id":"req_..."}}
pub fn error_response(
    status: StatusCode,
    error_type: &str,
    message: &str,
    request_id: &str,
) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// New request id in the `req_<uuid>` form used in error bodies and logs.
pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}
