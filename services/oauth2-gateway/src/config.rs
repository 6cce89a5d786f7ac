//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! A client secret is taken from `OAUTH2_<ID>_CLIENT_SECRET`, then from
//! `client_secret_file`, then from the inline `client_secret`, so secrets
//! can stay out of the TOML entirely.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use access::{AccessDecisionChain, AccessRule, PathPattern, RequireRegistration, RequireSecureTransport};
use common::Secret;
use oauth2_client::RegistrationSettings;
use serde::Deserialize;
use session::ExpiryPolicy;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub registrations: Vec<RegistrationSettings>,
    /// Ordered access rules; the first matching rule that decides wins
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub cors: Option<CorsConfig>,
}

/// HTTP listener and routing settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Where the browser lands after a successful login
    #[serde(default = "default_landing_page")]
    pub landing_page: String,
    /// Browsers hitting a protected path without a session are sent here
    #[serde(default)]
    pub login_page: Option<String>,
    #[serde(default = "default_realm")]
    pub realm: String,
    /// Adds `Secure` to the session cookie
    #[serde(default)]
    pub secure_cookie: bool,
    /// Honour `X-Forwarded-Proto` when judging whether a request arrived
    /// over HTTPS. Only enable behind a TLS-terminating proxy that sets it.
    #[serde(default)]
    pub trust_forwarded_proto: bool,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Backend that allowed requests are forwarded to
    #[serde(default)]
    pub upstream_url: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Session and pending-request lifetimes
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    /// Extend the expiry on every validated request
    #[serde(default)]
    pub sliding: bool,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_pending_ttl")]
    pub pending_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            sliding: false,
            sweep_interval_secs: default_sweep_interval(),
            pending_ttl_secs: default_pending_ttl(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn policy(&self) -> ExpiryPolicy {
        if self.sliding {
            ExpiryPolicy::Sliding
        } else {
            ExpiryPolicy::Absolute
        }
    }
}

/// One `[[rules]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    pub pattern: PathPattern,
    pub access: AccessConfig,
}

/// What a rule requires: a keyword, or a table.
///
/// `{ secure_transport = false }` keeps the rule in place but lets plain
/// HTTP through; the bare `"secure_transport"` keyword requires HTTPS.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AccessConfig {
    Keyword(AccessKeyword),
    SecureTransport { secure_transport: bool },
    Registrations { registrations: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKeyword {
    PermitAll,
    Authenticated,
    SecureTransport,
}

impl RuleConfig {
    pub fn to_rule(&self) -> AccessRule {
        let pattern = self.pattern.clone();
        match &self.access {
            AccessConfig::Keyword(AccessKeyword::PermitAll) => AccessRule::permit_all(pattern),
            AccessConfig::Keyword(AccessKeyword::Authenticated) => {
                AccessRule::authenticated(pattern)
            }
            AccessConfig::Keyword(AccessKeyword::SecureTransport) => {
                AccessRule::custom(pattern, Arc::new(RequireSecureTransport::new(true)))
            }
            AccessConfig::SecureTransport { secure_transport } => AccessRule::custom(
                pattern,
                Arc::new(RequireSecureTransport::new(*secure_transport)),
            ),
            AccessConfig::Registrations { registrations } => AccessRule::custom(
                pattern,
                Arc::new(RequireRegistration::new(registrations.iter().cloned())),
            ),
        }
    }
}

/// Cross-origin settings for browser clients on other origins
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed to call the gateway; `"*"` allows any
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_cors_methods")]
    pub allowed_methods: Vec<String>,
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default = "default_cors_max_age")]
    pub max_age_secs: u64,
}

fn default_landing_page() -> String {
    "/".to_string()
}

fn default_realm() -> String {
    "oauth2-gateway".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_session_ttl() -> u64 {
    1800
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_pending_ttl() -> u64 {
    600
}

fn default_cors_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_cors_max_age() -> u64 {
    3600
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order, per registration:
    /// 1. `OAUTH2_<ID>_CLIENT_SECRET` env var
    /// 2. `client_secret_file` path from config
    /// 3. inline `client_secret`
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        for registration in &mut config.registrations {
            resolve_client_secret(registration)?;
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if let Some(upstream) = &self.server.upstream_url {
            let valid = url::Url::parse(upstream)
                .map(|u| matches!(u.scheme(), "http" | "https"))
                .unwrap_or(false);
            if !valid {
                return Err(common::Error::Config(format!(
                    "upstream_url must start with http:// or https://, got: {upstream}"
                )));
            }
        }

        if self.server.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.server.landing_page.trim().is_empty() {
            return Err(common::Error::Config("landing_page must not be empty".into()));
        }

        for (name, value) in [
            ("session.ttl_secs", self.session.ttl_secs),
            ("session.pending_ttl_secs", self.session.pending_ttl_secs),
            ("session.sweep_interval_secs", self.session.sweep_interval_secs),
        ] {
            if value == 0 {
                return Err(common::Error::Config(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        // Registration rules must name registrations that exist
        let known: HashSet<&str> = self
            .registrations
            .iter()
            .map(|r| r.registration_id.as_str())
            .collect();
        for rule in &self.rules {
            if let AccessConfig::Registrations { registrations } = &rule.access {
                if registrations.is_empty() {
                    return Err(common::Error::Config(format!(
                        "rule '{}' lists no registrations",
                        rule.pattern.as_str()
                    )));
                }
                if let Some(unknown) = registrations.iter().find(|id| !known.contains(id.as_str())) {
                    return Err(common::Error::Config(format!(
                        "rule '{}' references unknown registration '{unknown}'",
                        rule.pattern.as_str()
                    )));
                }
            }
        }

        Ok(())
    }

    /// Build the access chain from `[[rules]]` in declaration order.
    pub fn access_chain(&self) -> AccessDecisionChain {
        AccessDecisionChain::new(self.rules.iter().map(RuleConfig::to_rule).collect())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oauth2-gateway.toml")
    }
}

/// Env var holding the client secret for a registration,
/// e.g. `OAUTH2_KEYCLOAK_CLIENT_SECRET` for `keycloak`.
pub fn client_secret_env_var(registration_id: &str) -> String {
    let id: String = registration_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("OAUTH2_{id}_CLIENT_SECRET")
}

fn resolve_client_secret(registration: &mut RegistrationSettings) -> common::Result<()> {
    if let Ok(secret) = std::env::var(client_secret_env_var(&registration.registration_id)) {
        registration.client_secret = Some(Secret::new(secret));
        return Ok(());
    }

    if let Some(secret_file) = &registration.client_secret_file {
        let secret = std::fs::read_to_string(secret_file).map_err(|e| {
            common::Error::registration(
                &registration.registration_id,
                format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ),
            )
        })?;
        let secret = secret.trim().to_owned();
        if !secret.is_empty() {
            registration.client_secret = Some(Secret::new(secret));
        }
    }

    Ok(())
}
