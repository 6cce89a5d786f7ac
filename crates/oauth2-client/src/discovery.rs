//! OpenID Provider discovery
//!
//! Resolves a registration's endpoints from
//! `{issuer}/.well-known/openid-configuration` at startup, the way a
//! registration built from an issuer location is expected to behave.

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Path appended to the issuer URI.
pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// The subset of provider metadata the gateway needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

/// Fetch and check provider metadata for `issuer_uri`.
///
/// The returned `issuer` must equal the configured one (ignoring a trailing
/// slash); a mismatch means the URI points at a different provider.
pub async fn discover(client: &reqwest::Client, issuer_uri: &str) -> Result<ProviderMetadata> {
    let issuer = issuer_uri.trim_end_matches('/');
    let url = format!("{issuer}{WELL_KNOWN_PATH}");
    debug!(url = %url, "fetching provider metadata");

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::Discovery(format!("request to {url} failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Discovery(format!("{url} returned {status}")));
    }

    let metadata = response
        .json::<ProviderMetadata>()
        .await
        .map_err(|e| Error::Discovery(format!("invalid metadata from {url}: {e}")))?;

    if metadata.issuer.trim_end_matches('/') != issuer {
        return Err(Error::Discovery(format!(
            "issuer mismatch: configured {issuer}, provider reports {}",
            metadata.issuer
        )));
    }

    info!(
        issuer = %metadata.issuer,
        authorization_endpoint = %metadata.authorization_endpoint,
        token_endpoint = %metadata.token_endpoint,
        "provider metadata discovered"
    );
    Ok(metadata)
}
