//! callgate binary

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use callgate_core::GatewayConfig;
use callgate_core::logging::{log_welcome, setup_logging};
use callgate_server::api::{ApiState, create_router};
use callgate_server::build_gateway;
use callgate_server::cli::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GatewayConfig::load(args.config.as_deref()).context("loading configuration")?;
    args.apply(&mut config);
    config.validate()?;

    setup_logging(&config.logging)?;
    log_welcome(&config.logging, env!("CARGO_PKG_VERSION"));

    let gateway = build_gateway(&config, args.transport).context("building gateway")?;
    let app = create_router(ApiState::new(gateway.clone()));

    let address = config.listen_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {}", address))?;
    info!(
        "Listening on {} ({:?} transport, media {})",
        address, args.transport, config.media.file
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    let closed = gateway.shutdown().await;
    info!("Shutdown complete, closed {} active calls", closed);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
