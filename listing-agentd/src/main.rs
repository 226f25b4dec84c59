mod api;
mod config;

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use listing_client::{HttpDirectoryClient, RegistrationController, TokioScheduler};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("listing_agentd=info,listing_client=info"))
        )
        .init();

    tracing::info!("Starting listing-agentd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/listing-agent/agentd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let client = HttpDirectoryClient::new(config.directory.url.clone(), config.request_timeout())
        .context("Failed to build directory HTTP client")?;
    tracing::info!("Using directory at {}", client.base_url());

    // Cancelling this token stops the HTTP server and every scheduled refresh
    let cancel = CancellationToken::new();
    let scheduler = TokioScheduler::new(cancel.child_token());

    let record = config.server.record();
    tracing::info!(
        "Server {} ({}) on port {}",
        record.status.name,
        record.uuid,
        record.port
    );

    let controller = RegistrationController::new(
        Arc::new(client),
        Arc::new(scheduler),
        config.credentials(),
        record,
        config.registration.settings(),
    );

    // Build API router
    let app = api::routes::router(api::routes::AppState {
        controller: controller.clone(),
    });

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal; listening starts before the first registration does
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
        }
    };
    run_lifecycle(controller, shutdown).await;

    // Trigger cancellation
    cancel.cancel();

    if let Err(e) = server_handle.await {
        tracing::error!("Server task failed: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Register in the background, then deregister once `shutdown` resolves.
///
/// A registration still in flight at shutdown is awaited first so that it
/// can be undone; the transport timeout bounds that wait.
async fn run_lifecycle(controller: Arc<RegistrationController>, shutdown: impl Future<Output = ()>) {
    let starter = controller.clone();
    let start_handle = tokio::spawn(async move {
        // Failures are logged by the controller; the caller retries via the API
        if let Err(e) = starter.on_start().await {
            tracing::error!("Initial registration did not complete: {}", e);
        }
    });

    shutdown.await;
    tracing::info!("Shutdown signal received");

    if let Err(e) = start_handle.await {
        tracing::error!("Startup task failed: {}", e);
    }

    if let Err(e) = controller.on_stop().await {
        tracing::error!("Failed to deregister on shutdown: {}", e);
    }
}
