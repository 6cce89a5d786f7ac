//! Error types for the login flow
//!
//! Every variant is request-scoped; the gateway maps each one to an HTTP
//! status. Startup failures use `common::Error::Config` instead.

/// Errors from the OAuth2 login flow.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("authorization denied by provider: {error}")]
    ProviderDenied {
        error: String,
        description: Option<String>,
    },

    #[error("invalid or expired state")]
    InvalidState,

    #[error("missing callback parameter: {0}")]
    MissingParameter(&'static str),

    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("unknown client registration: {0}")]
    NotFound(String),

    #[error("provider discovery failed: {0}")]
    Discovery(String),
}

impl Error {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ProviderDenied { .. } => "provider_denied",
            Error::InvalidState => "invalid_state",
            Error::MissingParameter(_) => "missing_parameter",
            Error::TokenExchangeFailed(_) => "token_exchange_failed",
            Error::NotFound(_) => "not_found",
            Error::Discovery(_) => "discovery_failed",
        }
    }
}

/// Result alias for login flow operations.
pub type Result<T> = std::result::Result<T, Error>;
