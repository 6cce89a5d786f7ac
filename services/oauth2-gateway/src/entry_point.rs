//! Response for requests that need a session but have none
//!
//! API clients get a 401 with a `WWW-Authenticate` challenge. Browsers
//! (`Accept: text/html`) are redirected to the login page when one is
//! configured.

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::error::GatewayError;

#[derive(Debug, Clone)]
pub struct EntryPoint {
    challenge: HeaderValue,
    login_page: Option<String>,
}

impl EntryPoint {
    pub fn new(realm: &str, login_page: Option<String>) -> common::Result<Self> {
        let challenge = HeaderValue::from_str(&format!("Bearer realm=\"{realm}\"")).map_err(|e| {
            common::Error::Config(format!("realm is not a valid header value: {e}"))
        })?;
        Ok(Self {
            challenge,
            login_page,
        })
    }

    /// Start authentication for an unauthenticated request.
    pub fn commence(&self, headers: &HeaderMap, request_id: &str) -> Response {
        if let Some(login_page) = &self.login_page
            && accepts_html(headers)
        {
            return found(login_page);
        }

        let mut response = GatewayError::Unauthorized.to_response(request_id);
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, self.challenge.clone());
        response
    }
}

fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

/// 302 Found to `location`.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}
