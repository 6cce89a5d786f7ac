//! Error types for session validation

/// Why a session id did not resolve to a live session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("session not found")]
    NotFound,

    #[error("session expired")]
    Expired,
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
