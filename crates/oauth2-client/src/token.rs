//! Authorization-code exchange at the provider's token endpoint

use common::Secret;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::registry::{ClientAuthMethod, ClientRegistration};

/// Longest slice of a provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 256;

/// Token endpoint response (RFC 6749 section 5.1).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: Secret<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Seconds until the access token expires; 0 when the provider omits it.
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default)]
    pub id_token: Option<Secret<String>>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Exchange an authorization code for tokens.
///
/// The client authenticates per the registration's
/// `client_authentication_method`. Network failures, non-2xx statuses and
/// undecodable bodies all surface as `TokenExchangeFailed`.
pub async fn exchange_code(
    client: &reqwest::Client,
    registration: &ClientRegistration,
    code: &str,
    redirect_uri: &str,
    code_verifier: Option<&str>,
) -> Result<TokenResponse> {
    let mut form: Vec<(&str, &str)> = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", registration.client_id.as_str()),
    ];
    if let Some(verifier) = code_verifier {
        form.push(("code_verifier", verifier));
    }

    let mut request = client.post(registration.token_endpoint.clone());
    match registration.client_authentication_method {
        ClientAuthMethod::ClientSecretPost => {
            form.push(("client_secret", registration.client_secret.expose().as_str()));
        }
        ClientAuthMethod::ClientSecretBasic => {
            request = request.basic_auth(
                &registration.client_id,
                Some(registration.client_secret.expose()),
            );
        }
    }

    debug!(
        registration_id = %registration.registration_id,
        token_endpoint = %registration.token_endpoint,
        pkce = code_verifier.is_some(),
        "exchanging authorization code"
    );

    let response = request
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::TokenExchangeFailed(format!("token request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(
            registration_id = %registration.registration_id,
            status = status.as_u16(),
            "token endpoint rejected the code"
        );
        return Err(Error::TokenExchangeFailed(format!(
            "token endpoint returned {status}: {}",
            truncate(&body, MAX_ERROR_BODY)
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchangeFailed(format!("invalid token response: {e}")))
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
