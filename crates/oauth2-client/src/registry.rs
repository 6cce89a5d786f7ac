//! Client registrations
//!
//! Registrations are read from configuration once at startup and never
//! change afterwards. Any missing required field (`client_id`,
//! `client_secret`, `redirect_uri`) or unresolvable endpoint aborts boot
//! with `common::Error::Config`.

use std::collections::HashMap;
use std::path::PathBuf;

use common::Secret;
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::discovery::{self, ProviderMetadata};
use crate::error::{Error, Result};

/// How the client authenticates at the token endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// `client_id` and `client_secret` in the form body
    #[default]
    ClientSecretPost,
    /// HTTP Basic `Authorization` header
    ClientSecretBasic,
}

/// One `[[registrations]]` entry as written in the config file.
///
/// Required fields are `Option` so that a missing one surfaces as a
/// configuration error naming the registration, not a TOML parse error.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationSettings {
    pub registration_id: String,
    #[serde(default)]
    pub issuer_uri: Option<String>,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    /// Claim naming the principal in the ID token or userinfo response
    #[serde(default = "default_user_name_attribute")]
    pub user_name_attribute: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to env/inline)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(default)]
    pub client_authentication_method: ClientAuthMethod,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_pkce")]
    pub pkce: bool,
}

fn default_user_name_attribute() -> String {
    "sub".to_string()
}

fn default_pkce() -> bool {
    true
}

impl RegistrationSettings {
    /// Check the fields every registration needs, before any network call.
    fn check_required(&self) -> common::Result<()> {
        check_registration_id(&self.registration_id)?;
        required(&self.registration_id, "client_id", self.client_id.as_deref())?;
        required(&self.registration_id, "redirect_uri", self.redirect_uri.as_deref())?;
        match &self.client_secret {
            Some(secret) if !secret.is_blank() => Ok(()),
            _ => Err(common::Error::registration(
                &self.registration_id,
                "client_secret is required",
            )),
        }
    }

    fn needs_discovery(&self) -> bool {
        self.authorization_endpoint.is_none() || self.token_endpoint.is_none()
    }
}

/// A validated, immutable client registration.
#[derive(Debug, Clone)]
pub struct ClientRegistration {
    pub registration_id: String,
    pub issuer_uri: Option<String>,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub userinfo_endpoint: Option<Url>,
    pub user_name_attribute: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub client_authentication_method: ClientAuthMethod,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub pkce: bool,
}

impl ClientRegistration {
    /// Build a registration from its settings and, when it was fetched,
    /// the provider's discovered metadata. Explicit endpoints win over
    /// discovered ones.
    pub fn from_settings(
        settings: RegistrationSettings,
        discovered: Option<&ProviderMetadata>,
    ) -> common::Result<Self> {
        settings.check_required()?;
        let id = settings.registration_id.clone();

        let authorization_endpoint = settings
            .authorization_endpoint
            .or_else(|| discovered.map(|m| m.authorization_endpoint.clone()))
            .ok_or_else(|| common::Error::registration(&id, missing_endpoint("authorization_endpoint")))?;
        let token_endpoint = settings
            .token_endpoint
            .or_else(|| discovered.map(|m| m.token_endpoint.clone()))
            .ok_or_else(|| common::Error::registration(&id, missing_endpoint("token_endpoint")))?;
        let userinfo_endpoint = settings
            .userinfo_endpoint
            .or_else(|| discovered.and_then(|m| m.userinfo_endpoint.clone()));

        let redirect_uri = settings.redirect_uri.unwrap_or_default();
        parse_url(&id, "redirect_uri", &redirect_uri)?;

        Ok(Self {
            authorization_endpoint: parse_url(&id, "authorization_endpoint", &authorization_endpoint)?,
            token_endpoint: parse_url(&id, "token_endpoint", &token_endpoint)?,
            userinfo_endpoint: userinfo_endpoint
                .map(|u| parse_url(&id, "userinfo_endpoint", &u))
                .transpose()?,
            issuer_uri: settings.issuer_uri,
            user_name_attribute: settings.user_name_attribute,
            client_id: settings.client_id.unwrap_or_default(),
            client_secret: settings
                .client_secret
                .unwrap_or_else(|| Secret::new(String::new())),
            client_authentication_method: settings.client_authentication_method,
            redirect_uri,
            scopes: settings.scopes,
            pkce: settings.pkce,
            registration_id: id,
        })
    }
}

/// All client registrations, keyed by registration id.
#[derive(Debug, Clone)]
pub struct ClientRegistry {
    registrations: HashMap<String, ClientRegistration>,
}

impl ClientRegistry {
    /// Validate and load registrations, discovering endpoints from each
    /// `issuer_uri` that lacks explicit ones.
    ///
    /// Required fields of every registration are checked before the first
    /// discovery request, so a typo fails without touching the network.
    pub async fn load(
        settings: Vec<RegistrationSettings>,
        http_client: &reqwest::Client,
    ) -> common::Result<Self> {
        if settings.is_empty() {
            return Err(common::Error::Config(
                "at least one client registration is required".into(),
            ));
        }
        for s in &settings {
            s.check_required()?;
        }

        let mut registrations = Vec::with_capacity(settings.len());
        for s in settings {
            let discovered = match (&s.issuer_uri, s.needs_discovery()) {
                (Some(issuer), true) => Some(
                    discovery::discover(http_client, issuer)
                        .await
                        .map_err(|e| common::Error::registration(&s.registration_id, e))?,
                ),
                _ => None,
            };
            registrations.push(ClientRegistration::from_settings(s, discovered.as_ref())?);
        }

        Self::from_registrations(registrations)
    }

    /// Build a registry from already-validated registrations.
    pub fn from_registrations(registrations: Vec<ClientRegistration>) -> common::Result<Self> {
        let mut map = HashMap::with_capacity(registrations.len());
        for registration in registrations {
            let id = registration.registration_id.clone();
            info!(
                registration_id = %id,
                client_id = %registration.client_id,
                authorization_endpoint = %registration.authorization_endpoint,
                pkce = registration.pkce,
                "client registration loaded"
            );
            if map.insert(id.clone(), registration).is_some() {
                return Err(common::Error::registration(&id, "duplicate registration_id"));
            }
        }
        Ok(Self {
            registrations: map,
        })
    }

    pub fn lookup(&self, registration_id: &str) -> Result<&ClientRegistration> {
        self.registrations
            .get(registration_id)
            .ok_or_else(|| Error::NotFound(registration_id.to_string()))
    }

    /// Registration ids in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.registrations.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

fn check_registration_id(id: &str) -> common::Result<()> {
    if id.is_empty() {
        return Err(common::Error::Config("registration_id must not be empty".into()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(common::Error::registration(
            id,
            "registration_id may only contain ASCII letters, digits, '-', '_' and '.'",
        ));
    }
    Ok(())
}

fn required(id: &str, field: &str, value: Option<&str>) -> common::Result<()> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(common::Error::registration(id, format!("{field} is required"))),
    }
}

fn missing_endpoint(field: &str) -> String {
    format!("{field} is required when issuer_uri is not set")
}

fn parse_url(id: &str, field: &str, value: &str) -> common::Result<Url> {
    let url = Url::parse(value)
        .map_err(|e| common::Error::registration(id, format!("{field} is not a valid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(common::Error::registration(
            id,
            format!("{field} must use http or https, got: {value}"),
        ));
    }
    Ok(url)
}
