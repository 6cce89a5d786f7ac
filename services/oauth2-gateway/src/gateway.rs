//! Routes and request handling
//!
//! - `GET /login` lists the registrations
//! - `GET /login/{registration_id}` starts a login (302 to the provider)
//! - `GET /callback/{registration_id}` completes it and sets the session cookie
//! - `POST /logout` revokes the session
//! - `GET /session` describes the current session
//! - `GET /health`, `GET /metrics`
//! - everything else passes the access chain, then goes upstream

use std::sync::Arc;
use std::time::Instant;

use access::{AccessDecisionChain, RequestContext, Verdict};
use axum::Router;
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use oauth2_client::{AuthorizationRequestBuilder, CallbackHandler, CallbackParams, ClientRegistry};
use session::{AuthenticatedSession, SessionIssuer};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

use crate::entry_point::{EntryPoint, found};
use crate::error::{GatewayError, new_request_id};
use crate::firewall;
use crate::metrics;
use crate::proxy::{self, ProxyState, SESSION_COOKIE, SESSION_HEADER};

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub authorizer: AuthorizationRequestBuilder,
    pub callbacks: CallbackHandler,
    pub sessions: Arc<SessionIssuer>,
    pub access: Arc<AccessDecisionChain>,
    pub entry_point: EntryPoint,
    pub proxy: Option<ProxyState>,
    pub landing_page: String,
    pub secure_cookie: bool,
    pub trust_forwarded_proto: bool,
    pub started_at: Instant,
    pub prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// A concurrency limit layer caps in-flight requests at `max_connections`.
pub fn build_router(state: AppState, max_connections: usize, cors: Option<CorsLayer>) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/login", get(login_page_handler))
        .route("/login/{registration_id}", get(login_handler))
        .route("/callback/{registration_id}", get(callback_handler))
        .route("/logout", post(logout_handler))
        .route("/session", get(session_handler))
        .fallback(gate_handler)
        .layer(middleware::from_fn(track_request))
        .layer(TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state);

    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

async fn track_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let started = Instant::now();
    let response = next.run(request).await;
    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Health endpoint: status, registrations, live sessions, uptime.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "registrations": state.registry.len(),
        "sessions": state.sessions.len().await,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Login page: one entry per registration with the URL that starts it.
async fn login_page_handler(State(state): State<AppState>) -> impl IntoResponse {
    let registrations: Vec<_> = state
        .registry
        .ids()
        .into_iter()
        .map(|id| {
            serde_json::json!({
                "registration_id": id,
                "login_url": format!("/login/{id}"),
            })
        })
        .collect();
    axum::Json(serde_json::json!({ "registrations": registrations }))
}

#[instrument(skip_all, fields(registration_id = %registration_id))]
async fn login_handler(
    State(state): State<AppState>,
    Path(registration_id): Path<String>,
) -> Response {
    match state.authorizer.begin(&registration_id).await {
        Ok((url, _)) => found(&url),
        Err(e) => {
            let request_id = new_request_id();
            warn!(request_id = %request_id, error = %e, "login could not start");
            GatewayError::from(e).to_response(&request_id)
        }
    }
}

#[instrument(skip_all, fields(registration_id = %registration_id))]
async fn callback_handler(
    State(state): State<AppState>,
    Path(registration_id): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Response {
    match state.callbacks.complete(&registration_id, params).await {
        Ok(session) => {
            metrics::record_login(&registration_id, "success");
            let mut response = found(&state.landing_page);
            set_cookie(
                &mut response,
                &session_cookie(&session.session_id, state.secure_cookie),
            );
            response
        }
        Err(e) => {
            let request_id = new_request_id();
            let label = match &e {
                oauth2_client::Error::NotFound(_) => "unknown",
                _ => registration_id.as_str(),
            };
            metrics::record_login(label, e.kind());
            warn!(request_id = %request_id, error = %e, "login failed");
            GatewayError::from(e).to_response(&request_id)
        }
    }
}

async fn logout_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(session_id) = session_id_from(&headers) {
        state.sessions.revoke(&session_id).await;
    }
    let mut response = StatusCode::NO_CONTENT.into_response();
    set_cookie(&mut response, &clear_cookie(state.secure_cookie));
    response
}

async fn session_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match resolve_session(&state.sessions, &headers).await {
        Some(session) => axum::Json(describe(&session)).into_response(),
        None => state.entry_point.commence(&headers, &new_request_id()),
    }
}

/// Every other path: access chain first, then upstream (or a description
/// of the principal when no upstream is configured).
async fn gate_handler(State(state): State<AppState>, request: Request) -> Response {
    let request_id = new_request_id();
    let path = match firewall::canonical_path(request.uri().path()) {
        Ok(path) => path,
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "request path rejected");
            return e.to_response(&request_id);
        }
    };
    let session = resolve_session(&state.sessions, request.headers()).await;
    let context = RequestContext::new(
        request.method().as_str(),
        path,
        is_secure(&request, state.trust_forwarded_proto),
    );

    let verdict = state.access.evaluate(&context, session.as_ref());
    metrics::record_access_decision(verdict.label());

    match verdict {
        Verdict::Unauthorized => state.entry_point.commence(request.headers(), &request_id),
        Verdict::Forbidden => {
            warn!(
                request_id = %request_id,
                path = %context.path,
                principal_id = session.as_ref().map(|s| s.principal_id.as_str()),
                "access denied"
            );
            GatewayError::Forbidden.to_response(&request_id)
        }
        Verdict::Allow => match &state.proxy {
            Some(proxy) => proxy::forward(proxy, request, session.as_ref(), &request_id)
                .await
                .unwrap_or_else(|e| e.to_response(&request_id)),
            None => {
                let body = match &session {
                    Some(s) => describe(s),
                    None => serde_json::json!({ "authenticated": false }),
                };
                axum::Json(body).into_response()
            }
        },
    }
}

fn describe(session: &AuthenticatedSession) -> serde_json::Value {
    serde_json::json!({
        "authenticated": true,
        "principal": session.principal_id,
        "registration_id": session.registration_id,
        "expires_in_seconds": session.remaining().as_secs(),
    })
}

/// Look up the caller's session. Expired or unknown ids count as no session.
async fn resolve_session(
    sessions: &SessionIssuer,
    headers: &HeaderMap,
) -> Option<AuthenticatedSession> {
    let session_id = session_id_from(headers)?;
    match sessions.validate(&session_id).await {
        Ok(session) => Some(session),
        Err(e) => {
            debug!(reason = %e, "session rejected");
            None
        }
    }
}

/// Session id from the session cookie, else from the `X-Session-Id` header.
fn session_id_from(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

/// Whether the client reached the gateway over HTTPS. `X-Forwarded-Proto`
/// counts only when the gateway sits behind a proxy trusted to set it.
fn is_secure(request: &Request, trust_forwarded_proto: bool) -> bool {
    request.uri().scheme_str() == Some("https")
        || (trust_forwarded_proto
            && request
                .headers()
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|proto| proto.eq_ignore_ascii_case("https")))
}

fn session_cookie(session_id: &str, secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}={session_id}; HttpOnly; Path=/; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn clear_cookie(secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn set_cookie(response: &mut Response, cookie: &str) {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => warn!(error = %e, "session cookie not representable as a header"),
    }
}

/// Log the login routes once at startup.
pub fn log_routes(registry: &ClientRegistry) {
    for id in registry.ids() {
        info!(registration_id = id, login = %format!("/login/{id}"), callback = %format!("/callback/{id}"), "login route ready");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use access::AccessRule;
    use axum::body::Body;
    use axum::http::Request;
    use oauth2_client::{DEFAULT_PENDING_TTL, PendingRequests, RegistrationSettings};
    use session::ExpiryPolicy;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    const SESSION_TTL: Duration = Duration::from_secs(1800);

    /// Create a PrometheusHandle for tests without installing a global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle()
    }

    /// Minimal OAuth2 provider: a token endpoint that issues an ID token
    /// whose subject is `user-<code>`, answering `bad-code` with 400.
    async fn start_provider() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let app = Router::new().route(
            "/token",
            post(|axum::Form(form): axum::Form<HashMap<String, String>>| async move {
                let code = form.get("code").cloned().unwrap_or_default();
                if code == "bad-code" {
                    return (
                        StatusCode::BAD_REQUEST,
                        axum::Json(serde_json::json!({"error": "invalid_grant"})),
                    );
                }
                use base64::Engine;
                let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;
                let id_token = format!(
                    "{}.{}.sig",
                    b64.encode(r#"{"alg":"none"}"#),
                    b64.encode(serde_json::json!({"sub": format!("user-{code}")}).to_string())
                );
                (
                    StatusCode::OK,
                    axum::Json(serde_json::json!({
                        "access_token": "at_123",
                        "token_type": "Bearer",
                        "expires_in": 300,
                        "id_token": id_token,
                    })),
                )
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        url
    }

    /// Start a mock upstream server that echoes back request headers and path as JSON.
    async fn start_echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new().fallback(|request: Request<Body>| async move {
            let headers: serde_json::Map<String, serde_json::Value> = request
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.to_string(),
                        serde_json::Value::String(value.to_str().unwrap_or("").to_string()),
                    )
                })
                .collect();
            axum::Json(serde_json::json!({
                "echoed_headers": headers,
                "path": request.uri().path(),
            }))
        });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        url
    }

    fn settings(provider: &str, id: &str) -> RegistrationSettings {
        toml::from_str(&format!(
            r#"
registration_id = "{id}"
authorization_endpoint = "{provider}/authorize"
token_endpoint = "{provider}/token"
client_id = "oauth2-client-app"
client_secret = "Su4ATret5R17gTgst91YZgt67QCIDoua"
redirect_uri = "http://localhost:8081/callback/{id}"
scopes = ["openid"]
"#
        ))
        .unwrap()
    }

    struct TestGateway {
        app: Router,
        sessions: Arc<SessionIssuer>,
        pending: Arc<PendingRequests>,
    }

    async fn gateway(upstream: Option<String>, login_page: Option<&str>) -> TestGateway {
        let provider = start_provider().await;
        let registry = Arc::new(
            ClientRegistry::load(
                vec![settings(&provider, "keycloak"), settings(&provider, "github")],
                &reqwest::Client::new(),
            )
            .await
            .unwrap(),
        );
        let pending = Arc::new(PendingRequests::new(DEFAULT_PENDING_TTL));
        let sessions = Arc::new(SessionIssuer::new(SESSION_TTL, ExpiryPolicy::Absolute));
        let access = AccessDecisionChain::new(vec![
            AccessRule::permit_all("/public/*"),
            AccessRule::custom(
                "/admin/**",
                Arc::new(access::RequireRegistration::new(["github"])),
            ),
            AccessRule::authenticated("/**"),
        ]);

        let state = AppState {
            authorizer: AuthorizationRequestBuilder::new(registry.clone(), pending.clone()),
            callbacks: CallbackHandler::new(
                registry.clone(),
                pending.clone(),
                sessions.clone(),
                reqwest::Client::new(),
            ),
            registry,
            sessions: sessions.clone(),
            access: Arc::new(access),
            entry_point: EntryPoint::new("oauth2-gateway", login_page.map(String::from)).unwrap(),
            proxy: upstream.map(|upstream_url| ProxyState {
                client: reqwest::Client::new(),
                upstream_url,
                timeout: Duration::from_secs(5),
            }),
            landing_page: "/home".into(),
            secure_cookie: false,
            trust_forwarded_proto: false,
            started_at: Instant::now(),
            prometheus: test_prometheus_handle(),
        };

        TestGateway {
            app: build_router(state, 1000, None),
            sessions,
            pending,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn location(response: &Response) -> String {
        response.headers()[header::LOCATION]
            .to_str()
            .unwrap()
            .to_string()
    }

    /// Walk the login flow and return the session id from the cookie.
    async fn login(gw: &TestGateway, registration_id: &str, code: &str) -> String {
        let response = send(&gw.app, get_req(&format!("/login/{registration_id}"))).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let redirect = url::Url::parse(&location(&response)).unwrap();
        let state = redirect
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        let response = send(
            &gw.app,
            get_req(&format!("/callback/{registration_id}?code={code}&state={state}")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/home");

        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("GATEWAY_SESSION="), "got: {cookie}");
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(!cookie.contains("Secure"));
        cookie
            .trim_start_matches("GATEWAY_SESSION=")
            .split(';')
            .next()
            .unwrap()
            .to_string()
    }

    fn with_cookie(uri: &str, session_id: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::COOKIE, format!("theme=dark; GATEWAY_SESSION={session_id}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn login_redirects_to_provider() {
        let gw = gateway(None, None).await;
        let response = send(&gw.app, get_req("/login/keycloak")).await;

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = location(&response);
        assert!(
            location.contains("/authorize?client_id=oauth2-client-app&response_type=code&state="),
            "got: {location}"
        );
        assert!(location.contains("code_challenge_method=S256"));
        assert_eq!(gw.pending.len().await, 1);
    }

    #[tokio::test]
    async fn login_unknown_registration_is_404() {
        let gw = gateway(None, None).await;
        let response = send(&gw.app, get_req("/login/gitlab")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "not_found");
        assert!(json["error"]["request_id"].as_str().unwrap().starts_with("req_"));
    }

    #[tokio::test]
    async fn login_page_lists_registrations() {
        let gw = gateway(None, None).await;
        let json = body_json(send(&gw.app, get_req("/login")).await).await;
        let regs = json["registrations"].as_array().unwrap();
        assert_eq!(regs.len(), 2);
        assert_eq!(regs[0]["registration_id"], "github");
        assert_eq!(regs[1]["login_url"], "/login/keycloak");
    }

    #[tokio::test]
    async fn full_flow_grants_access_to_protected_path() {
        let gw = gateway(None, None).await;
        let session_id = login(&gw, "keycloak", "abc").await;

        let response = send(&gw.app, with_cookie("/private/x", &session_id)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["principal"], "user-abc");
        assert_eq!(json["registration_id"], "keycloak");

        let session = send(&gw.app, with_cookie("/session", &session_id)).await;
        assert_eq!(session.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn session_header_is_accepted() {
        let gw = gateway(None, None).await;
        let session_id = login(&gw, "keycloak", "abc").await;

        let response = send(
            &gw.app,
            Request::builder()
                .uri("/private/x")
                .header("x-session-id", &session_id)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn callback_replay_is_rejected() {
        let gw = gateway(None, None).await;
        let response = send(&gw.app, get_req("/login/keycloak")).await;
        let redirect = url::Url::parse(&location(&response)).unwrap();
        let state = redirect
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let uri = format!("/callback/keycloak?code=abc&state={state}");

        assert_eq!(send(&gw.app, get_req(&uri)).await.status(), StatusCode::FOUND);
        let replay = send(&gw.app, get_req(&uri)).await;
        assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(replay).await["error"]["type"], "invalid_state");
        assert_eq!(gw.sessions.len().await, 1);
    }

    #[tokio::test]
    async fn callback_provider_error_is_401() {
        let gw = gateway(None, None).await;
        let response = send(
            &gw.app,
            get_req("/callback/keycloak?error=access_denied&error_description=User%20cancelled"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "provider_denied");
    }

    #[tokio::test]
    async fn callback_rejected_code_is_502() {
        let gw = gateway(None, None).await;
        let response = send(&gw.app, get_req("/login/keycloak")).await;
        let redirect = url::Url::parse(&location(&response)).unwrap();
        let state = redirect
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        let response = send(
            &gw.app,
            get_req(&format!("/callback/keycloak?code=bad-code&state={state}")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn public_path_is_open_and_private_path_challenges() {
        let gw = gateway(None, None).await;

        let public = send(&gw.app, get_req("/public/x")).await;
        assert_eq!(public.status(), StatusCode::OK);
        assert_eq!(body_json(public).await["authenticated"], false);

        let private = send(&gw.app, get_req("/private/x")).await;
        assert_eq!(private.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            private.headers()[header::WWW_AUTHENTICATE],
            "Bearer realm=\"oauth2-gateway\""
        );
        assert_eq!(body_json(private).await["error"]["type"], "unauthorized");
    }

    #[tokio::test]
    async fn browser_is_sent_to_login_page() {
        let gw = gateway(None, Some("/login")).await;
        let response = send(
            &gw.app,
            Request::builder()
                .uri("/private/x")
                .header(header::ACCEPT, "text/html")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/login");
    }

    #[tokio::test]
    async fn wrong_registration_is_forbidden() {
        let gw = gateway(None, None).await;
        let keycloak = login(&gw, "keycloak", "abc").await;
        let github = login(&gw, "github", "def").await;

        let denied = send(&gw.app, with_cookie("/admin/panel", &keycloak)).await;
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(denied).await["error"]["type"], "forbidden");

        let allowed = send(&gw.app, with_cookie("/admin/panel", &github)).await;
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_session_is_treated_as_anonymous() {
        let gw = gateway(None, None).await;
        let response = send(&gw.app, with_cookie("/private/x", "forged")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_revokes_session_and_clears_cookie() {
        let gw = gateway(None, None).await;
        let session_id = login(&gw, "keycloak", "abc").await;

        let response = send(
            &gw.app,
            Request::builder()
                .method("POST")
                .uri("/logout")
                .header(header::COOKIE, format!("GATEWAY_SESSION={session_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.contains("Max-Age=0"), "got: {cookie}");

        let after = send(&gw.app, with_cookie("/private/x", &session_id)).await;
        assert_eq!(after.status(), StatusCode::UNAUTHORIZED);
        assert!(gw.sessions.is_empty().await);
    }

    #[tokio::test]
    async fn session_endpoint_without_session_is_401() {
        let gw = gateway(None, None).await;
        let response = send(&gw.app, get_req("/session")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn upstream_receives_identity_and_not_spoofed_headers() {
        let upstream = start_echo_server().await;
        let gw = gateway(Some(upstream), None).await;
        let session_id = login(&gw, "keycloak", "abc").await;

        let response = send(
            &gw.app,
            Request::builder()
                .uri("/private/data?x=1")
                .header(
                    header::COOKIE,
                    format!("theme=dark; GATEWAY_SESSION={session_id}; lang=en"),
                )
                .header("x-authenticated-principal", "admin")
                .header("x-custom", "preserved")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["path"], "/private/data");
        assert_eq!(json["echoed_headers"]["x-authenticated-principal"], "user-abc");
        assert_eq!(json["echoed_headers"]["x-authenticated-registration"], "keycloak");
        assert_eq!(json["echoed_headers"]["x-custom"], "preserved");
        assert_eq!(json["echoed_headers"]["cookie"], "theme=dark; lang=en");
        assert!(json["echoed_headers"].get("x-session-id").is_none());
    }

    #[tokio::test]
    async fn session_only_cookie_is_not_forwarded() {
        let upstream = start_echo_server().await;
        let gw = gateway(Some(upstream), None).await;
        let session_id = login(&gw, "keycloak", "abc").await;

        let response = send(
            &gw.app,
            Request::builder()
                .uri("/private/data")
                .header(header::COOKIE, format!("GATEWAY_SESSION={session_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["echoed_headers"]["x-authenticated-principal"], "user-abc");
        assert!(json["echoed_headers"].get("cookie").is_none());
    }

    #[tokio::test]
    async fn dot_segments_cannot_escape_a_permitted_prefix() {
        let upstream = start_echo_server().await;
        let gw = gateway(Some(upstream), None).await;

        let direct = send(&gw.app, get_req("/private/secret")).await;
        assert_eq!(direct.status(), StatusCode::UNAUTHORIZED);

        for uri in [
            "/public/../private/secret",
            "/public/%2e%2e/private/secret",
            "/public/.%2E/private/secret",
            "/public/..%2fprivate/secret",
        ] {
            let response = send(&gw.app, get_req(uri)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri: {uri}");
            let json = body_json(response).await;
            assert_eq!(json["error"]["type"], "invalid_request", "uri: {uri}");
            assert!(json.get("path").is_none(), "reached upstream: {uri}");
        }
    }

    #[tokio::test]
    async fn encoded_path_is_matched_after_decoding() {
        let gw = gateway(None, None).await;
        let keycloak = login(&gw, "keycloak", "abc").await;

        let plain = send(&gw.app, with_cookie("/admin/panel", &keycloak)).await;
        assert_eq!(plain.status(), StatusCode::FORBIDDEN);

        let encoded = send(&gw.app, with_cookie("/%61dmin/panel", &keycloak)).await;
        assert_eq!(encoded.status(), StatusCode::FORBIDDEN);
    }

    fn forwarded_https(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn forwarded_proto_needs_a_trusted_proxy() {
        let request = forwarded_https("/x");
        assert!(!is_secure(&request, false));
        assert!(is_secure(&request, true));

        let plain = get_req("/x");
        assert!(!is_secure(&plain, true));
        assert!(is_secure(&get_req("https://gateway.example.com/x"), false));
    }

    #[tokio::test]
    async fn anonymous_public_request_is_forwarded_without_identity() {
        let upstream = start_echo_server().await;
        let gw = gateway(Some(upstream), None).await;

        let response = send(
            &gw.app,
            Request::builder()
                .uri("/public/page")
                .header("x-authenticated-principal", "admin")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["echoed_headers"].get("x-authenticated-principal").is_none());
    }

    #[tokio::test]
    async fn dead_upstream_is_502() {
        let gw = gateway(Some("http://127.0.0.1:1".into()), None).await;
        let response = send(&gw.app, get_req("/public/x")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["error"]["type"], "upstream_error");
    }

    #[tokio::test]
    async fn health_and_metrics_bypass_access_rules() {
        let gw = gateway(None, None).await;

        let health = send(&gw.app, get_req("/health")).await;
        assert_eq!(health.status(), StatusCode::OK);
        let json = body_json(health).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["registrations"], 2);
        assert!(json["uptime_seconds"].is_u64());

        let metrics = send(&gw.app, get_req("/metrics")).await;
        assert_eq!(metrics.status(), StatusCode::OK);
        let content_type = metrics.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }

    #[test]
    fn session_id_prefers_cookie_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("a=1; GATEWAY_SESSION=from-cookie"));
        headers.insert(SESSION_HEADER, HeaderValue::from_static("from-header"));
        assert_eq!(session_id_from(&headers).as_deref(), Some("from-cookie"));

        headers.remove(header::COOKIE);
        assert_eq!(session_id_from(&headers).as_deref(), Some("from-header"));

        headers.insert(header::COOKIE, HeaderValue::from_static("GATEWAY_SESSION="));
        assert_eq!(session_id_from(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn secure_cookie_flag_is_appended() {
        assert_eq!(
            session_cookie("abc", true),
            "GATEWAY_SESSION=abc; HttpOnly; Path=/; SameSite=Lax; Secure"
        );
        assert!(!session_cookie("abc", false).contains("Secure"));
    }
}
