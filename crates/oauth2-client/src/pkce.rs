//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! The verifier stays server-side inside the pending `AuthorizationRequest`
//! and is sent only to the token endpoint; the S256 challenge travels in the
//! authorization redirect.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// `code_challenge_method` sent with every PKCE challenge.
pub const CHALLENGE_METHOD: &str = "S256";

/// Generate a cryptographically random PKCE code verifier.
///
/// 32 random bytes as URL-safe base64 without padding: 43 characters, the
/// minimum length RFC 7636 allows, with 256 bits of entropy.
pub fn generate_verifier() -> String {
    common::random_token()
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}
