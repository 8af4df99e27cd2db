use anyhow::{Context, Result};
use tokio::signal;
use tracing::info;

use duet_relay::{serve, telemetry::Telemetry, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;
    let config = Config::load()?;

    info!(
        listen_addr = %config.listen_addr,
        serve_static = config.serve_static,
        static_dir = %config.static_dir.display(),
        "starting duet-relay"
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!("duet-relay listening on {}", config.listen_addr);

    let state = AppState::new(telemetry.metrics_handle());
    serve(listener, state, &config, shutdown_signal()).await?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
