//! DB Cluster Kubernetes Operator
//!
//! Main entry point for the operator. Sets up the Kubernetes client, the
//! shared PD client cache and the metrics server, then runs the cluster
//! controller until a shutdown signal arrives.

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use db_cluster_operator::{
    config::OperatorConfig,
    controllers::{self, Context},
    metrics,
    pd::DefaultPdControl,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::parse();

    // Initialize tracing
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = config.namespace().unwrap_or("all"),
        workers = config.workers,
        "Starting DB Cluster Operator"
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let pd_control = Arc::new(DefaultPdControl::new(client.clone(), config.pd_timeout()));
    let metrics_port = config.metrics_port;
    let context = Arc::new(Context::new(client, config, pd_control));

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(metrics_port));
    info!("Metrics server starting on port {}", metrics_port);

    let shutdown = CancellationToken::new();
    let mut cluster_controller = tokio::spawn(controllers::run_cluster_controller(
        context.clone(),
        shutdown.clone(),
    ));

    // Handle graceful shutdown
    tokio::select! {
        _ = &mut cluster_controller => {
            error!("Cluster controller exited unexpectedly");
            metrics::OPERATOR_HEALTH.set(0.0);
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
            shutdown.cancel();
            if let Err(e) = cluster_controller.await {
                warn!(error = %e, "Cluster controller did not stop cleanly");
            }
        }
    }

    info!("DB Cluster Operator stopped");
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
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for CTRL+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
