//! OAuth2 Authorization-Code client with PKCE
//!
//! Provides client registration lookup (with optional OpenID issuer
//! discovery), authorization redirect construction, the pending-request
//! store, token exchange, and the callback handler that turns a provider
//! redirect into an `AuthenticatedSession`.
//!
//! Login flow:
//! 1. `ClientRegistry::load()` at startup, fatal on bad configuration
//! 2. `AuthorizationRequestBuilder::begin()` → redirect URL, request stored
//!    in `PendingRequests` under its `state`
//! 3. Provider redirects back → `CallbackHandler::complete()` consumes the
//!    state, calls `token::exchange_code()`, resolves the principal
//! 4. `session::SessionIssuer::issue()` materializes the session

pub mod authorization;
pub mod callback;
pub mod discovery;
pub mod error;
pub mod pkce;
pub mod principal;
pub mod registry;
pub mod token;

#[cfg(test)]
mod test_support;

pub use authorization::{
    AuthorizationRequest, AuthorizationRequestBuilder, DEFAULT_PENDING_TTL, PendingRequests,
    build_authorization_url,
};
pub use callback::{CallbackHandler, CallbackParams};
pub use discovery::{ProviderMetadata, discover};
pub use error::{Error, Result};
pub use pkce::{compute_challenge, generate_verifier};
pub use principal::resolve_principal;
pub use registry::{ClientAuthMethod, ClientRegistration, ClientRegistry, RegistrationSettings};
pub use token::{TokenResponse, exchange_code};
