// ============================================================================
// API Gateway process
// ============================================================================
//
// Entry point for the ingress gateway: load config, initialize telemetry,
// connect the bus and the counter store, then serve until a shutdown
// signal arrives. Configuration or connection failures abort the process
// with a non-zero exit code so orchestration restarts it.
//
// ============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use portico_config::Config;
use portico_server::gateway::Gateway;
use portico_server::telemetry;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let telemetry = telemetry::init(&config.telemetry, &config.rust_log)
        .context("failed to initialize telemetry")?;

    info!("=== API Gateway starting ===");
    info!(port = config.gateway.port, "listen port");
    info!(origin = %config.gateway.frontend_origin, "CORS origin");

    let gateway = Arc::new(
        Gateway::connect(config)
            .await
            .context("failed to connect gateway collaborators")?,
    );

    {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                gateway.stop();
            }
        });
    }

    gateway.start().await.context("gateway exited with error")?;

    telemetry.shutdown();
    info!("API Gateway stopped");
    Ok(())
}
