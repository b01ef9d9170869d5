//! SSO Gateway
//!
//! Entry point for the gateway's token issuance and forwarding service.

use sso_gateway::config::Config;
use sso_gateway::dispatch::{Dispatcher, ReqwestTransport};
use sso_gateway::routes::{self, AppState};
use sso_gateway::services::key_management_service;
use sso_gateway::services::sso_service::{SsoIssuanceService, SsoSettings};
use sso_gateway::services::token_issuer::TokenIssuer;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration is read first so the log format can follow it
    let config = Config::from_env();
    let json_logs = config.as_ref().is_ok_and(|config| config.json_logs);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sso_gateway=debug,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting SSO Gateway");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        token_algorithm = %config.sso.token_algorithm,
        backends = config.dispatch.backends.len(),
        cluster_secured = config.dispatch.cluster_secured,
        "Configuration loaded successfully"
    );

    let metrics_handle = routes::init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        e
    })?;

    // Load (or generate) the signing key and prove it round-trips
    let key_pair = key_management_service::load_signing_key_pair(config.signing_key_file.as_deref())
        .await
        .map_err(|e| {
            error!("Failed to load signing key: {}", e);
            e
        })?;
    key_management_service::self_check(&key_pair, &config.sso.token_algorithm).map_err(|e| {
        error!("Signing key self-check failed: {}", e);
        e
    })?;
    let key_pair = Arc::new(key_pair);

    let whitelist = config.redirect_validator.clone();
    if whitelist.is_empty() {
        info!("No redirect whitelist configured; all redirect targets will be rejected");
    }

    let sso = SsoIssuanceService::new(
        TokenIssuer::new(config.sso.token_issuer.clone(), key_pair.clone()),
        whitelist,
        SsoSettings::from(&config.sso),
    );

    let transport = ReqwestTransport::new(config.dispatch.forward_timeout).map_err(|e| {
        error!("Failed to create backend client: {}", e);
        e
    })?;
    let dispatcher = Dispatcher::new(Arc::new(transport), &config.dispatch);

    // Parse bind address before moving config
    let bind_address = config.bind_address.clone();

    let state = Arc::new(AppState {
        config,
        sso,
        dispatcher,
        key_pair,
    });

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("SSO Gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("SSO Gateway shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
