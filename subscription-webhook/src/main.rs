//! Subscription webhook server.
//!
//! This binary:
//! - Receives signed subscription events from the payment provider
//! - Verifies them against the shared webhook secret
//! - Upserts the subscription's active flag
//! - Acknowledges every genuine delivery with 200

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use subhook::web::router;
use subhook::{
    create_content_client, AppState, Config, HttpSubscriptionStore, InMemoryStore,
    SubscriptionStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration
    let config = Config::from_env();
    config.validate().context("Invalid configuration")?;
    info!(
        port = config.port,
        signature_tolerance_secs = config.signature_tolerance_secs,
        max_body_bytes = config.max_body_bytes,
        remote_store_configured = config.subscription_store_url.is_some(),
        "config_loaded"
    );

    let store = build_store(&config)?;

    let content = create_content_client(
        None,
        config.prismic_endpoint.as_deref(),
        config.prismic_access_token.as_deref(),
    );
    info!(content_client_configured = content.is_some(), "content_client_checked");

    // Create application state
    let state = AppState::new(config.clone(), store).context("Failed to build application state")?;

    let app = router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Pick the subscription backend from configuration.
fn build_store(config: &Config) -> Result<Arc<dyn SubscriptionStore>> {
    match &config.subscription_store_url {
        Some(url) => {
            let store = HttpSubscriptionStore::new(
                url,
                config.subscription_store_token.clone(),
                Duration::from_millis(config.request_timeout_ms),
            )
            .context("Failed to create subscription store client")?;
            info!(request_timeout_ms = config.request_timeout_ms, "remote_store_created");
            Ok(Arc::new(store))
        }
        None => {
            // Records do not survive a restart.
            warn!("subscription_store_not_configured");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "ctrl_c_handler_install_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "sigterm_handler_install_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
