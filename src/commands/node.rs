use anyhow::Result;

use proctor::config::{Config, Role};
use proctor::metrics::init_metrics;
use proctor::rpc::NodeServer;

/// Run one node until Ctrl-C
pub async fn node(config: Config, role: Role) -> Result<()> {
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    let server = NodeServer::new(config, role)?;
    println!("{}", server.info().display());
    println!();

    server.start_with_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
