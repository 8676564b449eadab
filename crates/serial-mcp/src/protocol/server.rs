//! Serial MCP Server Implementation
//!
//! This module implements the MCP server using rmcp 0.9's #[tool_router] pattern.
//! It routes MCP tool calls to the sessions held by a [`SessionManager`].

use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ErrorData as McpError,
};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use serial_mcp_core::{ConnectionConfig, Error, ServerConfig, SessionId};
use serial_mcp_port::PortDiscovery;
use serial_mcp_session::{LogExporter, SessionController, SessionManager, SessionManagerConfig};

use crate::tools::*;

fn invalid_params(message: impl Into<String>) -> McpError {
    McpError::new(ErrorCode(-32602), message.into(), None)
}

fn internal_error(message: impl Into<String>) -> McpError {
    McpError::new(ErrorCode(-32603), message.into(), None)
}

/// Map a session error to an MCP error.
///
/// Caller mistakes (unknown session, wrong state, bad input) become invalid
/// params; device and I/O failures become internal errors.
fn to_mcp_error(err: Error) -> McpError {
    match err {
        Error::SessionNotFound(_)
        | Error::SessionLimitReached(_)
        | Error::UserCancelled
        | Error::NotConnected
        | Error::InvalidState { .. }
        | Error::InvalidInput(_)
        | Error::Config(_) => invalid_params(err.to_string()),
        _ => internal_error(err.to_string()),
    }
}

fn json_result<T: Serialize>(response: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(response).map_err(|e| {
        error!("Failed to serialize response: {}", e);
        internal_error(format!("Failed to serialize response: {e}"))
    })?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

/// Serial MCP Server
///
/// Exposes serial sessions as MCP tools.
#[derive(Clone)]
pub struct SerialMcpServer {
    /// Session registry shared by all tool calls
    manager: Arc<SessionManager>,
    /// Line settings for connects that leave fields out
    line_defaults: ConnectionConfig,
    /// Tool router for handling MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl SerialMcpServer {
    /// Create a server over an existing session manager.
    pub fn new(manager: Arc<SessionManager>, line_defaults: ConnectionConfig) -> Self {
        Self {
            manager,
            line_defaults,
            tool_router: Self::tool_router(),
        }
    }

    /// Create a server from the loaded configuration.
    pub fn from_config(config: &ServerConfig, discovery: Arc<dyn PortDiscovery>) -> Self {
        let manager = SessionManager::new(discovery, SessionManagerConfig::from(config));
        Self::new(Arc::new(manager), config.serial.connection_config())
    }

    /// The session registry.
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Disconnect and drop every session.
    pub async fn shutdown(&self) {
        if let Err(e) = self.manager.close_all().await {
            warn!("Error closing sessions: {}", e);
        }
    }

    /// Get a session by ID (helper method)
    fn get_session(&self, session_id: &str) -> Result<SessionController, McpError> {
        let id: SessionId = session_id
            .parse()
            .map_err(|_| invalid_params(format!("Invalid session ID format: {session_id}")))?;
        self.manager.get_session(&id).map_err(to_mcp_error)
    }

    fn session_response(session: &SessionController, message: String) -> SessionResponse {
        SessionResponse {
            session_id: session.id().to_string(),
            state: session.state(),
            message,
        }
    }

    /// List serial ports available for opening
    #[tool(description = "List the serial ports available for opening, with USB identities")]
    #[instrument(skip_all)]
    async fn serial_list_ports(
        &self,
        Parameters(_params): Parameters<ListPortsParams>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Listing serial ports");

        let ports: Vec<PortInfo> = self
            .manager
            .discovery()
            .list_authorized_ports()
            .await
            .iter()
            .map(|port| PortInfo::from(port.as_ref()))
            .collect();

        info!("Found {} port(s)", ports.len());

        json_result(&ListPortsResponse {
            count: ports.len(),
            ports,
        })
    }

    /// Create a session and (by default) connect it
    #[tool(
        description = "Create a serial session and connect it to a port. Select the port by name or by USB vendor/product ID; leave both out to use the first available port."
    )]
    #[instrument(skip_all)]
    async fn serial_session_create(
        &self,
        Parameters(params): Parameters<SessionCreateParams>,
    ) -> Result<CallToolResult, McpError> {
        let request = params.port.to_request().map_err(invalid_params)?;
        let config = params
            .line
            .resolve(self.line_defaults)
            .map_err(invalid_params)?;

        let mut options = self.manager.defaults().clone();
        params.options.apply_to(&mut options);

        info!(
            "Creating serial session: port={:?}, identity={:?}, config={}, connect={}",
            request.port_name,
            request.identity,
            config.shorthand(),
            params.connect
        );

        let session = self
            .manager
            .create_session(Some(options))
            .map_err(to_mcp_error)?;
        let session_id = session.id();

        if params.connect {
            if let Err(e) = session.connect(config, request).await {
                error!("Failed to connect session {}: {}", session_id, e);
                if let Err(close_err) = self.manager.close_session(&session_id).await {
                    warn!("Error discarding session {}: {}", session_id, close_err);
                }
                return Err(to_mcp_error(e));
            }
        }

        let info = session.info();
        let message = match &info.port_name {
            Some(port) => format!("Session connected to {port} ({})", config.shorthand()),
            None => "Session created (not connected)".to_string(),
        };

        info!("Session created successfully: session_id={}", session_id);

        json_result(&SessionCreateResponse {
            session_id: session_id.to_string(),
            session: info,
            message,
        })
    }

    /// List all serial sessions
    #[tool(description = "List all serial sessions with their state and port")]
    #[instrument(skip_all)]
    async fn serial_session_list(
        &self,
        Parameters(_params): Parameters<SessionListParams>,
    ) -> Result<CallToolResult, McpError> {
        let sessions = self.manager.list_sessions();
        info!("Found {} session(s)", sessions.len());

        json_result(&SessionListResponse {
            count: sessions.len(),
            sessions,
        })
    }

    /// Close a serial session
    #[tool(description = "Disconnect a serial session and remove it")]
    #[instrument(skip_all)]
    async fn serial_session_close(
        &self,
        Parameters(params): Parameters<SessionCloseParams>,
    ) -> Result<CallToolResult, McpError> {
        info!("Closing serial session: session_id={}", params.session_id);

        let session = self.get_session(&params.session_id)?;
        self.manager
            .close_session(&session.id())
            .await
            .map_err(to_mcp_error)?;

        json_result(&Self::session_response(
            &session,
            format!("Session '{}' closed", params.session_id),
        ))
    }

    /// Connect an existing session
    #[tool(
        description = "Connect an existing session to a port. Also accepted while the session waits for a removed device to return."
    )]
    #[instrument(skip_all)]
    async fn serial_connect(
        &self,
        Parameters(params): Parameters<ConnectParams>,
    ) -> Result<CallToolResult, McpError> {
        let session = self.get_session(&params.session_id)?;
        let request = params.port.to_request().map_err(invalid_params)?;
        let config = params
            .line
            .resolve(session.config().unwrap_or(self.line_defaults))
            .map_err(invalid_params)?;

        info!(
            "Connecting session {}: port={:?}, config={}",
            params.session_id,
            request.port_name,
            config.shorthand()
        );

        session.connect(config, request).await.map_err(|e| {
            error!("Failed to connect session {}: {}", params.session_id, e);
            to_mcp_error(e)
        })?;

        let port = session.port_name().unwrap_or_default();
        json_result(&Self::session_response(
            &session,
            format!("Connected to {port} ({})", config.shorthand()),
        ))
    }

    /// Disconnect a session
    #[tool(
        description = "Disconnect a session, keeping it and its log. Stops any pending auto-reconnect."
    )]
    #[instrument(skip_all)]
    async fn serial_disconnect(
        &self,
        Parameters(params): Parameters<DisconnectParams>,
    ) -> Result<CallToolResult, McpError> {
        let session = self.get_session(&params.session_id)?;
        session.disconnect().await.map_err(to_mcp_error)?;

        info!("Session disconnected: session_id={}", params.session_id);
        json_result(&Self::session_response(
            &session,
            "Disconnected".to_string(),
        ))
    }

    /// Send text to the device
    #[tool(
        description = "Send text to the device. The session's line terminator is appended."
    )]
    #[instrument(skip_all)]
    async fn serial_send(
        &self,
        Parameters(params): Parameters<SendParams>,
    ) -> Result<CallToolResult, McpError> {
        debug!(
            "Sending to session {}: {} char(s)",
            params.session_id,
            params.text.chars().count()
        );

        let session = self.get_session(&params.session_id)?;
        session.send(&params.text).await.map_err(|e| {
            error!("Failed to send to session {}: {}", params.session_id, e);
            to_mcp_error(e)
        })?;

        let chars_sent = params.text.chars().count();
        json_result(&SendResponse {
            session_id: params.session_id,
            chars_sent,
            message: format!("Sent {chars_sent} character(s)"),
        })
    }

    /// Read the session log
    #[tool(
        description = "Read the session log: sent text, received lines (the last one may be partial), errors and connection notices"
    )]
    #[instrument(skip_all)]
    async fn serial_read_log(
        &self,
        Parameters(params): Parameters<ReadLogParams>,
    ) -> Result<CallToolResult, McpError> {
        let session = self.get_session(&params.session_id)?;
        let events = session.read_log(params.since_last);
        let entries = log_entries(&events, params.max_events);

        debug!(
            "Read {} event(s) from session {} (since_last={})",
            entries.len(),
            params.session_id,
            params.since_last
        );

        json_result(&ReadLogResponse {
            session_id: params.session_id,
            state: session.state(),
            count: entries.len(),
            events: entries,
        })
    }

    /// Clear the session log
    #[tool(description = "Clear the session log")]
    #[instrument(skip_all)]
    async fn serial_clear_log(
        &self,
        Parameters(params): Parameters<ClearLogParams>,
    ) -> Result<CallToolResult, McpError> {
        let session = self.get_session(&params.session_id)?;
        session.clear_log();

        info!("Cleared log of session {}", params.session_id);
        json_result(&Self::session_response(
            &session,
            "Log cleared".to_string(),
        ))
    }

    /// Export the session log
    #[tool(
        description = "Export the whole session log as a text transcript or JSON lines, to a file or inline"
    )]
    #[instrument(skip_all)]
    async fn serial_export_log(
        &self,
        Parameters(params): Parameters<ExportLogParams>,
    ) -> Result<CallToolResult, McpError> {
        let session = self.get_session(&params.session_id)?;
        let events = session.log_snapshot();
        let exporter = LogExporter::new(params.format);

        let content = match &params.path {
            Some(path) => {
                exporter.save_to_file(&events, path).map_err(|e| {
                    error!("Failed to export log to {}: {}", path, e);
                    to_mcp_error(e)
                })?;
                info!("Exported {} event(s) to {}", events.len(), path);
                None
            }
            None => Some(exporter.render(&events).map_err(to_mcp_error)?),
        };

        json_result(&ExportLogResponse {
            session_id: params.session_id,
            event_count: events.len(),
            path: params.path,
            content,
        })
    }

    /// Change session options
    #[tool(
        description = "Change display format (text/binary), inbound newline handling, the terminator appended to sent text, or auto-reconnect"
    )]
    #[instrument(skip_all)]
    async fn serial_set_options(
        &self,
        Parameters(params): Parameters<SetOptionsParams>,
    ) -> Result<CallToolResult, McpError> {
        let session = self.get_session(&params.session_id)?;
        let options = &params.options;

        if let Some(format) = options.display_format {
            session.set_display_format(format);
        }
        if let Some(newline) = options.newline {
            session.set_newline_policy(newline);
        }
        if let Some(terminator) = options.line_terminator {
            session.set_line_terminator(terminator);
        }
        if let Some(enabled) = options.reconnect {
            session.set_reconnect_enabled(enabled).await;
        }

        info!("Updated options of session {}", params.session_id);

        json_result(&SetOptionsResponse {
            session_id: params.session_id,
            display_format: session.display_format(),
            newline: session.newline_policy(),
            line_terminator: session.line_terminator(),
            reconnect: session.reconnect_enabled(),
        })
    }

    /// Wait for output or a state change
    #[tool(
        description = "Wait until a line matching a regex is received and/or the session reaches a state. Only output arriving after the call is searched."
    )]
    #[instrument(skip_all)]
    async fn serial_wait_for(
        &self,
        Parameters(params): Parameters<WaitForParams>,
    ) -> Result<CallToolResult, McpError> {
        info!(
            "Waiting on session {}: text={:?}, state={:?}, timeout_ms={}",
            params.session_id, params.text, params.state, params.timeout_ms
        );

        let session = self.get_session(&params.session_id)?;
        let result = session
            .wait_for(&params.condition())
            .await
            .map_err(to_mcp_error)?;

        if result.condition_met {
            info!("Condition met after {}ms", result.waited_ms);
        } else {
            debug!("Wait timed out after {}ms", result.waited_ms);
        }

        json_result(&WaitForResponse::new(params.session_id, &result))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for SerialMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Serial MCP Server - Talk to devices on serial ports (UART, USB CDC). \
                 Use serial_list_ports to find devices, serial_session_create to open one, \
                 serial_send to write a line and serial_read_log or serial_wait_for to read \
                 the reply. Sessions reconnect on their own when a USB device is unplugged \
                 and plugged back in."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
