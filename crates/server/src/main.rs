//! outpost-agent server entry point.
//!
//! Boots the agent runtime and serves its tools over stdio.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

use outpost_core::AppConfig;

mod handler;
mod state;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(origin = %config.origin, cache = %config.active_cache_name(), "Starting outpost-agent on stdio transport");

    let state = Arc::new(state::AppState::build(config).await?);

    // A failed install leaves the agent uninstalled; fetches still go to the network.
    match state.agent.install().await {
        Ok(status) => tracing::info!(namespace = %status.namespace, "agent installed"),
        Err(e) => tracing::error!(error = %e, "agent install failed"),
    }

    let handler = handler::OutpostServer::new(state.clone());
    let server = serve_server(handler, stdio()).await?;
    server.waiting().await?;

    state.agent.shutdown().await;
    Ok(())
}
