//! Provider callback handling
//!
//! Turns the provider's redirect back to the gateway into an
//! `AuthenticatedSession`. Validation order:
//! 1. provider-reported `error` → `ProviderDenied`
//! 2. unknown registration → `NotFound`
//! 3. missing, unknown, expired or foreign `state` → `InvalidState`
//! 4. missing `code` → `MissingParameter`
//!
//! The pending request is consumed in step 3, before any network I/O, so a
//! replayed state fails even while the first exchange is still in flight.

use std::sync::Arc;

use common::Secret;
use serde::Deserialize;
use session::{AuthenticatedSession, SessionIssuer};
use tracing::{info, instrument, warn};

use crate::authorization::PendingRequests;
use crate::error::{Error, Result};
use crate::principal::resolve_principal;
use crate::registry::ClientRegistry;
use crate::token::exchange_code;

/// Query parameters of the redirect back from the provider.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<Secret<String>>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Completes logins started by `AuthorizationRequestBuilder`.
#[derive(Clone)]
pub struct CallbackHandler {
    registry: Arc<ClientRegistry>,
    pending: Arc<PendingRequests>,
    sessions: Arc<SessionIssuer>,
    http_client: reqwest::Client,
}

impl CallbackHandler {
    pub fn new(
        registry: Arc<ClientRegistry>,
        pending: Arc<PendingRequests>,
        sessions: Arc<SessionIssuer>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            registry,
            pending,
            sessions,
            http_client,
        }
    }

    /// Complete a login for `registration_id` from the callback parameters.
    #[instrument(skip_all, fields(registration_id = %registration_id))]
    pub async fn complete(
        &self,
        registration_id: &str,
        params: CallbackParams,
    ) -> Result<AuthenticatedSession> {
        if let Some(error) = params.error {
            warn!(error = %error, "provider denied authorization");
            return Err(Error::ProviderDenied {
                error,
                description: params.error_description,
            });
        }

        let registration = self.registry.lookup(registration_id)?;

        let state = params
            .state
            .filter(|s| !s.is_empty())
            .ok_or(Error::InvalidState)?;
        let request = self.pending.consume(&state).await.ok_or_else(|| {
            warn!("callback state unknown, expired or already used");
            Error::InvalidState
        })?;
        if request.registration_id != registration.registration_id {
            warn!(
                expected = %request.registration_id,
                "callback state belongs to another registration"
            );
            return Err(Error::InvalidState);
        }

        let code = params
            .code
            .filter(|c| !c.is_blank())
            .ok_or(Error::MissingParameter("code"))?;

        let tokens = exchange_code(
            &self.http_client,
            registration,
            code.expose(),
            &request.redirect_uri,
            request.code_verifier.as_ref().map(|v| v.expose().as_str()),
        )
        .await?;

        let principal_id = resolve_principal(&self.http_client, registration, &tokens).await?;

        let session = self
            .sessions
            .issue(
                principal_id,
                registration.registration_id.as_str(),
                self.sessions.default_ttl(),
            )
            .await;
        info!(principal_id = %session.principal_id, "login completed");
        Ok(session)
    }
}
