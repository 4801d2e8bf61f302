use anyhow::Result;
use colored::Colorize;
use logspan::{config, server};
use std::net::SocketAddr;
use tracing::info;

/// Execute the serve command
///
/// Loads configuration, then runs the demo server until SIGINT/SIGTERM.
/// Telemetry (and the `tracing` subscriber) is initialized by the server.
pub async fn execute(addr: SocketAddr) -> Result<()> {
    println!("{}", "Starting logspan demo server...".green());

    let cfg = config::load_config()?;

    server::start_server(cfg, addr).await?;

    info!("Demo server exited");
    Ok(())
}
