//! OAuth2 Authorization-Code gateway
//!
//! Single-binary service that:
//! 1. Loads client registrations, discovering provider endpoints if needed
//! 2. Sends browsers through the provider login with state and PKCE
//! 3. Exchanges the returned code and issues a server-side session
//! 4. Gates every other path through ordered access rules and forwards
//!    allowed requests upstream

mod config;
mod cors;
mod entry_point;
mod error;
mod firewall;
mod gateway;
mod metrics;
mod proxy;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use oauth2_client::{AuthorizationRequestBuilder, CallbackHandler, ClientRegistry, PendingRequests};
use session::{SessionIssuer, Sweep, spawn_sweep_task};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::entry_point::EntryPoint;
use crate::gateway::{AppState, build_router};
use crate::proxy::ProxyState;

/// Maximum time to wait for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting oauth2-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.server.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let registry = Arc::new(
        ClientRegistry::load(config.registrations.clone(), &http_client)
            .await
            .context("invalid client registration")?,
    );
    let access = Arc::new(config.access_chain());
    let entry_point = EntryPoint::new(&config.server.realm, config.server.login_page.clone())
        .context("invalid server configuration")?;
    let cors = config
        .cors
        .as_ref()
        .map(cors::build_cors_layer)
        .transpose()
        .context("invalid CORS configuration")?;

    info!(
        listen_addr = %config.server.listen_addr,
        registrations = registry.len(),
        rules = access.rules().len(),
        upstream_url = config.server.upstream_url.as_deref().unwrap_or("none"),
        session_ttl_secs = config.session.ttl_secs,
        sliding = config.session.sliding,
        cors = cors.is_some(),
        "configuration loaded"
    );
    gateway::log_routes(&registry);

    let pending = Arc::new(PendingRequests::new(config.session.pending_ttl()));
    let sessions = Arc::new(SessionIssuer::new(
        config.session.ttl(),
        config.session.policy(),
    ));

    let sweep_targets: Vec<Arc<dyn Sweep>> = vec![
        sessions.clone() as Arc<dyn Sweep>,
        pending.clone() as Arc<dyn Sweep>,
    ];
    let sweeper = spawn_sweep_task(sweep_targets, config.session.sweep_interval());

    let proxy = config.server.upstream_url.clone().map(|upstream_url| ProxyState {
        client: http_client.clone(),
        upstream_url,
        timeout: Duration::from_secs(config.server.timeout_secs),
    });

    let app_state = AppState {
        authorizer: AuthorizationRequestBuilder::new(registry.clone(), pending.clone()),
        callbacks: CallbackHandler::new(
            registry.clone(),
            pending,
            sessions.clone(),
            http_client,
        ),
        registry,
        sessions,
        access,
        entry_point,
        proxy,
        landing_page: config.server.landing_page.clone(),
        secure_cookie: config.server.secure_cookie,
        trust_forwarded_proto: config.server.trust_forwarded_proto,
        started_at: Instant::now(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections, cors);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires: the server is
    // told to drain, then the drain races DRAIN_TIMEOUT.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    sweeper.abort();
    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
