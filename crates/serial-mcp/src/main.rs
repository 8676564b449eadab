//! # Serial MCP Server
//!
//! Model Context Protocol server for AI agents to talk to devices on serial
//! ports.
//!
//! ## Overview
//!
//! This server provides MCP tools for:
//! - Port discovery (list ports with USB identities)
//! - Session management (create, list, close, connect, disconnect)
//! - Data exchange (send text, read the session log, export it)
//! - Waiting mechanisms (wait for a received line or a session state)
//!
//! Sessions reopen a USB device on their own when it is unplugged and
//! plugged back in.
//!
//! ## Architecture
//!
//! This is Layer 2 - the main MCP server binary that ties together:
//! - serial-mcp-core: Core types and configuration
//! - serial-mcp-port: Port backends and the stream decoder
//! - serial-mcp-session: Session lifecycle and reconnect

use std::sync::Arc;

use anyhow::Context;
use rmcp::{transport::stdio, ServiceExt};
use serial_mcp::SerialMcpServer;
use serial_mcp_core::ServerConfig;
use serial_mcp_port::NativeDiscovery;

/// Value following `flag` on the command line.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let config = match flag_value(&args, "--config") {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {path}"))?,
        None => ServerConfig::default(),
    };

    // Initialize logging; stdout carries the MCP stream
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!(
        "Serial MCP Server v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    if config.server.transport != "stdio" {
        anyhow::bail!(
            "Unsupported transport '{}' (only stdio is available)",
            config.server.transport
        );
    }

    let discovery =
        NativeDiscovery::new(&config.discovery).context("Invalid discovery settings")?;
    let server = SerialMcpServer::from_config(&config, Arc::new(discovery));

    tracing::info!(
        "Server initialized (max_sessions={}, reconnect={}), starting stdio transport...",
        config.server.max_sessions,
        config.reconnect.enabled
    );

    // Serve the MCP server over stdio
    let service = server.clone().serve(stdio()).await.map_err(|e| {
        tracing::error!("Error starting server: {}", e);
        e
    })?;

    tracing::info!("Serial MCP Server running on stdio");

    // Wait for the service to complete
    service.waiting().await?;

    server.shutdown().await;
    tracing::info!("Serial MCP Server shutting down");

    Ok(())
}
