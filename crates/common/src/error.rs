//! Startup configuration errors
//!
//! Everything in here is fatal: the gateway refuses to boot rather than
//! serve with a half-valid client registration.

use thiserror::Error;

/// Common error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Shorthand for a configuration error scoped to one client registration.
    pub fn registration(registration_id: &str, message: impl std::fmt::Display) -> Self {
        Error::Config(format!("registration '{registration_id}': {message}"))
    }
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
