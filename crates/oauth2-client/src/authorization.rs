//! Authorization redirect construction and the pending-request store
//!
//! Each login attempt gets a fresh `state` (and PKCE verifier when the
//! registration enables it). The request is parked in `PendingRequests`
//! under its state until the provider redirects back, the TTL elapses, or
//! the sweep evicts it. Consumption is single-use: a state can complete at
//! most one callback.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use session::Sweep;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::Result;
use crate::pkce;
use crate::registry::{ClientRegistration, ClientRegistry};

/// How long a login attempt may take before its state is rejected.
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(600);

/// An in-flight login, keyed by `state`.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub state: String,
    pub code_verifier: Option<Secret<String>>,
    pub registration_id: String,
    pub redirect_uri: String,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl AuthorizationRequest {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Pending authorization requests awaiting their callback.
pub struct PendingRequests {
    requests: Mutex<HashMap<String, AuthorizationRequest>>,
    ttl: Duration,
}

impl PendingRequests {
    pub fn new(ttl: Duration) -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a request under its state.
    ///
    /// Returns `false` if a live request already holds the same state; an
    /// expired holder is replaced.
    pub async fn insert(&self, request: AuthorizationRequest) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.lock().await;
        if let Some(existing) = requests.get(&request.state)
            && !existing.is_expired_at(now)
        {
            return false;
        }
        requests.insert(request.state.clone(), request);
        true
    }

    /// Remove and return the request for `state`.
    ///
    /// Lookup and removal happen under one lock, so concurrent callbacks
    /// with the same state see at most one `Some`. An expired request is
    /// removed and reported as absent.
    pub async fn consume(&self, state: &str) -> Option<AuthorizationRequest> {
        let now = Instant::now();
        let request = self.requests.lock().await.remove(state)?;
        if request.is_expired_at(now) {
            debug!(
                registration_id = %request.registration_id,
                "authorization request expired before callback"
            );
            return None;
        }
        Some(request)
    }

    /// Evict every expired request. Returns the number removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut requests = self.requests.lock().await;
        let before = requests.len();
        requests.retain(|_, r| !r.is_expired_at(now));
        before - requests.len()
    }

    pub async fn len(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Sweep for PendingRequests {
    fn name(&self) -> &str {
        "pending_requests"
    }

    fn sweep(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
        Box::pin(PendingRequests::sweep(self))
    }
}

/// Build the provider authorization URL for a registration.
///
/// Parameters appear in a fixed order: `client_id`, `response_type`,
/// `state`, `redirect_uri`, `scope` (omitted when no scopes are configured),
/// then `code_challenge` and `code_challenge_method` when a challenge is
/// given. Query parameters already on the endpoint are kept.
pub fn build_authorization_url(
    registration: &ClientRegistration,
    state: &str,
    code_challenge: Option<&str>,
) -> String {
    let mut url = registration.authorization_endpoint.clone();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", &registration.client_id)
            .append_pair("response_type", "code")
            .append_pair("state", state)
            .append_pair("redirect_uri", &registration.redirect_uri);
        if !registration.scopes.is_empty() {
            query.append_pair("scope", &registration.scopes.join(" "));
        }
        if let Some(challenge) = code_challenge {
            query
                .append_pair("code_challenge", challenge)
                .append_pair("code_challenge_method", pkce::CHALLENGE_METHOD);
        }
    }
    url.into()
}

/// Starts logins: generates state and verifier, parks the request, and
/// returns the URL to redirect the browser to.
#[derive(Clone)]
pub struct AuthorizationRequestBuilder {
    registry: Arc<ClientRegistry>,
    pending: Arc<PendingRequests>,
}

impl AuthorizationRequestBuilder {
    pub fn new(registry: Arc<ClientRegistry>, pending: Arc<PendingRequests>) -> Self {
        Self { registry, pending }
    }

    /// Begin a login through `registration_id`.
    pub async fn begin(&self, registration_id: &str) -> Result<(String, AuthorizationRequest)> {
        let registration = self.registry.lookup(registration_id)?;

        loop {
            let state = common::random_token();
            let verifier = registration.pkce.then(pkce::generate_verifier);
            let challenge = verifier.as_deref().map(pkce::compute_challenge);

            let now = Instant::now();
            let request = AuthorizationRequest {
                state: state.clone(),
                code_verifier: verifier.map(Secret::new),
                registration_id: registration.registration_id.clone(),
                redirect_uri: registration.redirect_uri.clone(),
                created_at: now,
                expires_at: now + self.pending.ttl(),
            };

            // A state collision with a live request only regenerates
            if self.pending.insert(request.clone()).await {
                let url = build_authorization_url(registration, &state, challenge.as_deref());
                info!(
                    registration_id = %registration.registration_id,
                    pkce = registration.pkce,
                    "authorization request started"
                );
                return Ok((url, request));
            }
        }
    }
}
