//! Unguessable tokens for OAuth state values, PKCE verifiers and session ids

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;

/// Entropy of every generated token, in bytes (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Generate a cryptographically random token.
///
/// 32 random bytes encoded as URL-safe base64 without padding, which gives
/// 43 characters that are safe in query strings, cookies and headers.
pub fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn token_is_url_safe_base64() {
        let token = random_token();
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "token must be URL-safe base64 (no padding): {token}"
        );
    }

    #[test]
    fn tokens_do_not_collide() {
        let tokens: HashSet<String> = (0..1000).map(|_| random_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }
}
