//! SOPS Secret Kubernetes Operator
//!
//! Main entry point for the operator. Sets up the Kubernetes client, the
//! decrypt capability, the metrics server, and the reconciliation loop.

use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sops_secret_operator::{
    controllers::{self, Context},
    decrypt::{spawn_session_keepalive, SopsDecryptor},
    metrics,
};

/// Default metrics port
const METRICS_PORT: u16 = 8080;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    info!("Starting SOPS Secret Operator");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    // Wire up the decrypt capability
    let decryptor = Arc::new(SopsDecryptor::discover()?);

    // Create shared context
    let context = Arc::new(Context::new(client.clone(), decryptor));

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(METRICS_PORT));
    info!("Metrics server starting on port {}", METRICS_PORT);

    // Background GPG session keep-alive, independent of the reconcile path
    let shutdown = CancellationToken::new();
    let session_handle = spawn_session_keepalive(shutdown.clone());

    // Run the controller
    let controller = controllers::run_sops_secret_controller(client.clone(), context);

    // Handle graceful shutdown
    tokio::select! {
        _ = controller => {
            error!("SopsSecret controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    shutdown.cancel();
    if let Some(handle) = session_handle {
        let _ = handle.await;
    }

    info!("SOPS Secret Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
