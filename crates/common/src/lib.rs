//! Common types shared by the gateway crates

mod error;
mod random;
mod secret;

pub use error::{Error, Result};
pub use random::{TOKEN_BYTES, random_token};
pub use secret::Secret;
