//! MSSQL MCP bridge entry point.
//!
//! This binary serves the MCP protocol over stdio for Claude Desktop, Cursor
//! and other MCP clients.

use anyhow::Result;
use mssql_mcp_bridge::constants::DEFAULT_LOG_FILTER;
use mssql_mcp_bridge::shutdown::{install_signal_handlers, new_shutdown_controller};
use mssql_mcp_bridge::{Config, DatabaseService, MssqlMcpServer};
use rmcp::ServiceExt;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr (stdout is reserved for JSON-RPC)
    init_logging();

    info!(version = env!("CARGO_PKG_VERSION"), "MSSQL MCP bridge starting");

    let config = Config::from_env()?;
    info!(
        host = %config.database.host,
        port = config.database.port,
        database = %config.default_database(),
        whitelist = ?config.security.allowed_databases,
        "Configuration loaded"
    );

    let shutdown_controller = new_shutdown_controller();
    install_signal_handlers(shutdown_controller.clone()).await;

    let service = Arc::new(DatabaseService::from_config(&config));

    // Fail fast if the server is unreachable
    if let Err(e) = service.get_pool().await {
        error!(error = %e, "Could not connect to SQL Server");
        return Err(e.into());
    }

    let server = MssqlMcpServer::new(Arc::clone(&service));
    let running = server.serve(rmcp::transport::stdio()).await?;
    info!("Server initialized. Ready to accept requests");

    let mut shutdown_signal = shutdown_controller.signal();

    tokio::select! {
        quit_reason = running.waiting() => {
            match quit_reason {
                Ok(reason) => info!(?reason, "Service stopped"),
                Err(e) => error!(error = %e, "Service error"),
            }
        }
        _ = shutdown_signal.recv() => {
            info!("Shutdown signal received");
        }
    }

    shutdown_controller.graceful_shutdown(&service).await;
    Ok(())
}

/// Initialize tracing subscriber with stderr output.
fn init_logging() {
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
