//! Gateway entry point.
//!
//! Serves the HTTP/WebSocket API until Ctrl-C, then removes all networks
//! and destroys every remaining component.

use emucomp_core::ComponentManager;
use emucomp_gateway::{http, AppState, GatewayConfig};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("emucomp_gateway=info".parse()?)
                .add_directive("emucomp_core=info".parse()?)
                .add_directive("emucomp_process=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting emucomp gateway");

    let config = GatewayConfig::from_env();
    tracing::info!(?config, "Configuration loaded");

    // warn-only so the gateway starts on hosts without every tool installed
    config.validate_warn();

    let manager = Arc::new(ComponentManager::new(config.manager_config()?));
    let state = AppState::new(Arc::clone(&manager));
    let networks = Arc::clone(&state.networks);

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    let http_addr = config.http_addr;
    let server = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.recv().await;
        };
        if let Err(e) = http::serve(state, http_addr, shutdown).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });
    tracing::info!(http_addr = %http_addr, "Server ready");

    signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, cleaning up...");

    let _ = shutdown_tx.send(());

    networks.remove_all().await;
    manager.destroy_all().await;
    tracing::info!("All components cleaned up");

    let _ = server.await;
    tracing::info!("Server shutdown complete");
    Ok(())
}
