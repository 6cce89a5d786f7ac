//! Session store and expiry policy
//!
//! One `tokio::sync::Mutex` guards the whole map. Every operation is a
//! single critical section, so a session that `validate()` finds expired is
//! removed in the same step that reports it, and the sweep task never races
//! a concurrent lookup into resurrecting an entry.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::sweep::Sweep;

/// How a session's expiry moves after it is issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExpiryPolicy {
    /// `expires_at` is fixed at issue time.
    #[default]
    Absolute,
    /// Every successful validation pushes `expires_at` out by the session TTL.
    Sliding,
}

/// An authenticated principal bound to a server-side session.
#[derive(Clone)]
pub struct AuthenticatedSession {
    pub session_id: String,
    pub principal_id: String,
    pub registration_id: String,
    pub issued_at: Instant,
    pub expires_at: Instant,
    /// TTL the session was issued with; sliding expiry extends by this much.
    pub ttl: Duration,
}

impl AuthenticatedSession {
    /// Whether the session is past its expiry at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry (zero once expired).
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

// The session id is a bearer credential, so it never reaches Debug output.
impl fmt::Debug for AuthenticatedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedSession")
            .field("session_id", &"[REDACTED]")
            .field("principal_id", &self.principal_id)
            .field("registration_id", &self.registration_id)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Issues, validates and revokes sessions.
pub struct SessionIssuer {
    sessions: Mutex<HashMap<String, AuthenticatedSession>>,
    default_ttl: Duration,
    policy: ExpiryPolicy,
}

impl SessionIssuer {
    pub fn new(default_ttl: Duration, policy: ExpiryPolicy) -> Self {
        info!(
            ttl_secs = default_ttl.as_secs(),
            ?policy,
            "session issuer initialized"
        );
        Self {
            sessions: Mutex::new(HashMap::new()),
            default_ttl,
            policy,
        }
    }

    /// TTL configured for new logins.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }

    /// Materialize a session for a freshly authenticated principal.
    ///
    /// The id is regenerated on the (practically impossible) collision with
    /// a live session, so ids are unique among stored sessions.
    pub async fn issue(
        &self,
        principal_id: impl Into<String>,
        registration_id: impl Into<String>,
        ttl: Duration,
    ) -> AuthenticatedSession {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let session_id = loop {
            let candidate = common::random_token();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = AuthenticatedSession {
            session_id: session_id.clone(),
            principal_id: principal_id.into(),
            registration_id: registration_id.into(),
            issued_at: now,
            expires_at: now + ttl,
            ttl,
        };
        sessions.insert(session_id, session.clone());

        info!(
            principal_id = %session.principal_id,
            registration_id = %session.registration_id,
            ttl_secs = ttl.as_secs(),
            "session issued"
        );
        metrics::gauge!("gateway_sessions_active").set(sessions.len() as f64);
        session
    }

    /// Resolve a session id to its live session.
    ///
    /// Expired sessions are dropped here and reported as `Expired`; a second
    /// lookup of the same id then yields `NotFound`.
    pub async fn validate(&self, session_id: &str) -> Result<AuthenticatedSession> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(session_id).ok_or(Error::NotFound)?;

        if session.is_expired_at(now) {
            let expired = sessions.remove(session_id);
            if let Some(expired) = expired {
                debug!(
                    principal_id = %expired.principal_id,
                    registration_id = %expired.registration_id,
                    "session expired"
                );
            }
            return Err(Error::Expired);
        }

        if self.policy == ExpiryPolicy::Sliding {
            session.expires_at = now + session.ttl;
        }
        Ok(session.clone())
    }

    /// Remove a session immediately (logout). Returns whether it existed.
    pub async fn revoke(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.remove(session_id) {
            Some(session) => {
                info!(
                    principal_id = %session.principal_id,
                    registration_id = %session.registration_id,
                    "session revoked"
                );
                metrics::gauge!("gateway_sessions_active").set(sessions.len() as f64);
                true
            }
            None => false,
        }
    }

    /// Evict every expired session. Returns the number removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(now));
        metrics::gauge!("gateway_sessions_active").set(sessions.len() as f64);
        before - sessions.len()
    }

    /// Number of stored sessions, expired ones included until swept.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Sweep for SessionIssuer {
    fn name(&self) -> &str {
        "sessions"
    }

    fn sweep(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
        Box::pin(SessionIssuer::sweep(self))
    }
}
