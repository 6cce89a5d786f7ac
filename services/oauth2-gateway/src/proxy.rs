//! Forwarding of authorized requests to the upstream backend
//!
//! Strips hop-by-hop headers and the gateway's own credentials (the
//! session header and the session cookie), replaces any client-supplied
//! identity headers with the authenticated ones, and returns the upstream
//! response verbatim (error statuses included).

use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, header};
use axum::response::Response;
use session::AuthenticatedSession;
use tracing::{error, instrument, warn};

use crate::error::GatewayError;
use crate::metrics;

/// Identity headers set by the gateway; never taken from the client.
pub const PRINCIPAL_HEADER: &str = "x-authenticated-principal";
pub const REGISTRATION_HEADER: &str = "x-authenticated-registration";

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "GATEWAY_SESSION";

/// Header carrying a session id for non-browser clients.
pub const SESSION_HEADER: &str = "x-session-id";

/// Largest request body forwarded upstream.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Shared upstream settings
#[derive(Clone)]
pub struct ProxyState {
    pub client: reqwest::Client,
    pub upstream_url: String,
    pub timeout: Duration,
}

/// Forward an authorized request upstream.
///
/// Identity headers are set only when `session` is present; anonymous
/// requests on permitted paths are forwarded without them. Timeouts of
/// safe methods (GET, HEAD, OPTIONS, TRACE) get 2 retries with a 100ms
/// fixed backoff; everything else is sent once.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn forward(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    session: Option<&AuthenticatedSession>,
    request_id: &str,
) -> Result<Response, GatewayError> {
    let method = request.method().clone();
    let upstream_url = match request.uri().path_and_query() {
        Some(pq) => format!("{}{}", state.upstream_url.trim_end_matches('/'), pq),
        None => state.upstream_url.clone(),
    };

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in request.headers() {
        if !is_stripped(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    if let Some(cookies) = forwarded_cookies(request.headers()) {
        headers.insert(header::COOKIE, cookies);
    }
    if let Some(session) = session {
        insert_identity(&mut headers, PRINCIPAL_HEADER, &session.principal_id);
        insert_identity(&mut headers, REGISTRATION_HEADER, &session.registration_id);
    }

    let body = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| {
            error!(error = %e, "failed to read request body");
            GatewayError::InvalidRequest(e.to_string())
        })?;

    let max_attempts = if is_safe_to_retry(&method) { 3u32 } else { 1 };
    let retry_delay = Duration::from_millis(100);

    for attempt in 0..max_attempts {
        if attempt > 0 {
            warn!(attempt, "retrying after upstream timeout");
            tokio::time::sleep(retry_delay).await;
        }

        let result = state
            .client
            .request(method.clone(), &upstream_url)
            .headers(headers.clone())
            .timeout(state.timeout)
            .body(body.clone())
            .send()
            .await;

        match result {
            Ok(upstream) => return relay_response(upstream).await,
            Err(e) if e.is_timeout() && attempt < max_attempts - 1 => continue,
            Err(e) if e.is_timeout() => {
                metrics::record_upstream_error("timeout");
                error!(error = %e, attempts = max_attempts, "upstream timeout after all retries");
                return Err(GatewayError::UpstreamTimeout(state.timeout.as_secs()));
            }
            Err(e) => {
                metrics::record_upstream_error("connection");
                error!(error = %e, "upstream request failed");
                return Err(GatewayError::Upstream(e.to_string()));
            }
        }
    }

    Err(GatewayError::Upstream("retries exhausted".into()))
}

async fn relay_response(upstream: reqwest::Response) -> Result<Response, GatewayError> {
    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();
    let body = upstream.bytes().await.map_err(|e| {
        metrics::record_upstream_error("body");
        error!(error = %e, "failed to read upstream response body");
        GatewayError::Upstream(format!("response read error: {e}"))
    })?;

    let mut response = Response::builder().status(status);
    for (name, value) in &upstream_headers {
        if !is_hop_by_hop(name.as_str()) {
            response = response.header(name, value);
        }
    }
    response
        .body(axum::body::Body::from(body))
        .map_err(|e| GatewayError::Upstream(format!("response build error: {e}")))
}

fn insert_identity(headers: &mut reqwest::header::HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(HeaderName::from_static(name), v);
        }
        Err(e) => warn!(header = name, error = %e, "identity not representable as a header"),
    }
}

/// Methods whose repetition has no side effects on the upstream.
fn is_safe_to_retry(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// The client's cookies without the gateway session cookie, or `None` when
/// nothing else is left.
fn forwarded_cookies(headers: &HeaderMap) -> Option<HeaderValue> {
    let kept: Vec<&str> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let name = pair.split_once('=').map_or(*pair, |(name, _)| name);
            name.trim() != SESSION_COOKIE
        })
        .collect();

    if kept.is_empty() {
        return None;
    }
    HeaderValue::from_str(&kept.join("; ")).ok()
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Headers never copied as-is. `cookie` is rebuilt by `forwarded_cookies`.
fn is_stripped(name: &str) -> bool {
    is_hop_by_hop(name)
        || [
            "host",
            "cookie",
            SESSION_HEADER,
            PRINCIPAL_HEADER,
            REGISTRATION_HEADER,
        ]
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
