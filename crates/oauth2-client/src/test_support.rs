//! In-process OAuth2 provider for tests
//!
//! Serves discovery metadata, a token endpoint and a userinfo endpoint on
//! `127.0.0.1:0`. The token endpoint's behavior is driven by the `code`:
//! - `bad-code`    → 400 `invalid_grant`
//! - `no-subject`  → tokens without an `id_token`
//! - `garbage`     → 200 with a non-JSON body
//! - anything else → tokens whose `id_token` has `sub = "user-<code>"`

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use tokio::net::TcpListener;

use crate::registry::{ClientAuthMethod, ClientRegistration, RegistrationSettings};

pub const CLIENT_ID: &str = "oauth2-client-app";
pub const CLIENT_SECRET: &str = "Su4ATret5R17gTgst91YZgt67QCIDoua";
pub const ACCESS_TOKEN: &str = "at_123";

/// A token request as the provider received it.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub form: HashMap<String, String>,
    pub authorization: Option<String>,
}

struct MockState {
    base: String,
    token_requests: Mutex<Vec<TokenRequest>>,
}

pub struct MockProvider {
    state: Arc<MockState>,
    _server: tokio::task::JoinHandle<()>,
}

impl MockProvider {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState {
            base: format!("http://{addr}"),
            token_requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route(
                "/realms/{realm}/.well-known/openid-configuration",
                get(metadata_handler),
            )
            .route("/token", post(token_handler))
            .route("/userinfo", get(userinfo_handler))
            .with_state(state.clone());

        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            _server: server,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.state.base)
    }

    pub fn issuer(&self) -> String {
        self.url("/realms/oauth2")
    }

    pub fn token_requests(&self) -> Vec<TokenRequest> {
        self.state.token_requests.lock().unwrap().clone()
    }

    /// Settings for a registration pointing at this provider's endpoints.
    pub fn settings(&self, registration_id: &str) -> RegistrationSettings {
        RegistrationSettings {
            registration_id: registration_id.to_string(),
            issuer_uri: None,
            authorization_endpoint: Some(self.url("/authorize")),
            token_endpoint: Some(self.url("/token")),
            userinfo_endpoint: None,
            user_name_attribute: "sub".to_string(),
            client_id: Some(CLIENT_ID.to_string()),
            client_secret: Some(Secret::new(CLIENT_SECRET.to_string())),
            client_secret_file: None,
            client_authentication_method: ClientAuthMethod::ClientSecretPost,
            redirect_uri: Some(format!(
                "http://localhost:8081/callback/{registration_id}"
            )),
            scopes: vec!["openid".to_string(), "profile".to_string()],
            pkce: true,
        }
    }

    pub fn registration(&self, registration_id: &str) -> ClientRegistration {
        ClientRegistration::from_settings(self.settings(registration_id), None).unwrap()
    }
}

/// Unsigned JWT carrying `claims`; signatures are not checked by the gateway.
pub fn fake_id_token(claims: serde_json::Value) -> String {
    format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

async fn metadata_handler(State(state): State<Arc<MockState>>) -> Response {
    axum::Json(serde_json::json!({
        "issuer": format!("{}/realms/oauth2", state.base),
        "authorization_endpoint": format!("{}/authorize", state.base),
        "token_endpoint": format!("{}/token", state.base),
        "userinfo_endpoint": format!("{}/userinfo", state.base),
        "jwks_uri": format!("{}/certs", state.base),
        "code_challenge_methods_supported": ["plain", "S256"],
    }))
    .into_response()
}

async fn token_handler(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    axum::Form(form): axum::Form<HashMap<String, String>>,
) -> Response {
    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let code = form.get("code").cloned().unwrap_or_default();
    state.token_requests.lock().unwrap().push(TokenRequest {
        form,
        authorization,
    });

    match code.as_str() {
        "bad-code" => (
            StatusCode::BAD_REQUEST,
            axum::Json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Code not valid",
            })),
        )
            .into_response(),
        "garbage" => (StatusCode::OK, "this is not json").into_response(),
        "no-subject" => axum::Json(serde_json::json!({
            "access_token": ACCESS_TOKEN,
            "token_type": "Bearer",
            "expires_in": 300,
        }))
        .into_response(),
        _ => axum::Json(serde_json::json!({
            "access_token": ACCESS_TOKEN,
            "token_type": "Bearer",
            "expires_in": 300,
            "refresh_token": "rt_456",
            "scope": "openid profile",
            "id_token": fake_id_token(serde_json::json!({
                "iss": format!("{}/realms/oauth2", state.base),
                "sub": format!("user-{code}"),
                "aud": CLIENT_ID,
                "preferred_username": "alice",
            })),
        }))
        .into_response(),
    }
}

async fn userinfo_handler(headers: HeaderMap) -> Response {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let expected = format!("Bearer {ACCESS_TOKEN}");
    if bearer != Some(expected.as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    axum::Json(serde_json::json!({
        "sub": "userinfo-user",
        "id": 42,
        "login": "octocat",
    }))
    .into_response()
}
