//! Principal resolution from a token response
//!
//! The principal id is the registration's `user_name_attribute` claim,
//! taken from the ID token payload when one is present, else from the
//! userinfo endpoint. ID token signatures are not verified: the token came
//! straight from the token endpoint over the client-authenticated channel.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::registry::ClientRegistration;
use crate::token::TokenResponse;

/// Resolve the authenticated principal's id.
pub async fn resolve_principal(
    client: &reqwest::Client,
    registration: &ClientRegistration,
    tokens: &TokenResponse,
) -> Result<String> {
    let attribute = registration.user_name_attribute.as_str();

    if let Some(id_token) = &tokens.id_token {
        match id_token_claims(id_token.expose()) {
            Some(claims) => {
                if let Some(principal) = claim_as_string(&claims, attribute) {
                    return Ok(principal);
                }
                debug!(attribute, "id token lacks the user name attribute");
            }
            None => debug!("id token payload could not be decoded"),
        }
    }

    let Some(endpoint) = &registration.userinfo_endpoint else {
        return Err(Error::TokenExchangeFailed(format!(
            "no '{attribute}' claim in token response and no userinfo endpoint"
        )));
    };

    let response = client
        .get(endpoint.clone())
        .bearer_auth(tokens.access_token.expose())
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| Error::TokenExchangeFailed(format!("userinfo request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::TokenExchangeFailed(format!(
            "userinfo endpoint returned {status}"
        )));
    }

    let claims = response
        .json::<Value>()
        .await
        .map_err(|e| Error::TokenExchangeFailed(format!("invalid userinfo response: {e}")))?;

    claim_as_string(&claims, attribute).ok_or_else(|| {
        Error::TokenExchangeFailed(format!("userinfo response lacks '{attribute}'"))
    })
}

/// Decode the (unverified) payload segment of a compact JWT.
fn id_token_claims(id_token: &str) -> Option<Value> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn claim_as_string(claims: &Value, attribute: &str) -> Option<String> {
    match claims.get(attribute)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
