//! MCP Tool Types
//!
//! Parameter and response types for every tool exposed by the server, plus
//! the conversions from loose MCP parameters into session types.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use serial_mcp_core::{
    ConnectionConfig, DataBits, DeviceIdentity, DisplayFormat, ErrorKind, LineTerminator,
    LogEvent, LogKind, NewlinePolicy, Parity, SessionInfo, SessionState, StopBits,
};
use serial_mcp_port::{PortHandle, PortRequest};
use serial_mcp_session::{ExportFormat, SessionOptions, WaitCondition, WaitResult};

// =============================================================================
// Shared Parameter Groups
// =============================================================================

/// Which port to open.
///
/// With no field set, the first available port is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PortSelection {
    /// Exact port name (e.g. "/dev/ttyUSB0", "COM3")
    #[serde(default)]
    pub port_name: Option<String>,

    /// USB vendor ID of the device
    #[serde(default)]
    pub vendor_id: Option<u16>,

    /// USB product ID of the device
    #[serde(default)]
    pub product_id: Option<u16>,
}

impl PortSelection {
    /// Build the port request. Vendor and product IDs must be given together.
    pub fn to_request(&self) -> Result<PortRequest, String> {
        let identity = match (self.vendor_id, self.product_id) {
            (Some(vendor), Some(product)) => Some(DeviceIdentity::new(vendor, product)),
            (None, None) => None,
            _ => return Err("vendor_id and product_id must be given together".to_string()),
        };
        Ok(PortRequest {
            port_name: self.port_name.clone(),
            identity,
        })
    }
}

/// Line settings. Missing fields fall back to the server defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct LineSettings {
    /// Baud rate (e.g. 9600, 115200)
    #[serde(default)]
    pub baud_rate: Option<u32>,

    /// Data bits: 5, 6, 7 or 8
    #[serde(default)]
    pub data_bits: Option<u8>,

    /// Stop bits: 1 or 2
    #[serde(default)]
    pub stop_bits: Option<u8>,

    /// Parity: "none", "even" or "odd"
    #[serde(default)]
    pub parity: Option<Parity>,
}

impl LineSettings {
    /// Apply these settings on top of `defaults`.
    pub fn resolve(&self, defaults: ConnectionConfig) -> Result<ConnectionConfig, String> {
        let mut config = defaults;
        if let Some(baud_rate) = self.baud_rate {
            config.baud_rate = baud_rate;
        }
        if let Some(bits) = self.data_bits {
            config.data_bits = DataBits::try_from(bits)?;
        }
        if let Some(bits) = self.stop_bits {
            config.stop_bits = StopBits::try_from(bits)?;
        }
        if let Some(parity) = self.parity {
            config.parity = parity;
        }
        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }
}

// =============================================================================
// Port Discovery Tools
// =============================================================================

/// Parameters for serial_list_ports
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListPortsParams {}

/// A port the server may open.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PortInfo {
    /// Port name
    pub port_name: String,

    /// USB identity, when the port exposes one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<DeviceIdentity>,
}

impl From<&dyn PortHandle> for PortInfo {
    fn from(port: &dyn PortHandle) -> Self {
        Self {
            port_name: port.name().to_string(),
            identity: port.identity(),
        }
    }
}

/// Response for serial_list_ports
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListPortsResponse {
    /// Available ports
    pub ports: Vec<PortInfo>,

    /// Total count
    pub count: usize,
}

// =============================================================================
// Session Management Tools
// =============================================================================

/// Parameters for serial_session_create
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SessionCreateParams {
    /// Port to open
    #[serde(default)]
    pub port: PortSelection,

    /// Line settings
    #[serde(default)]
    pub line: LineSettings,

    /// Session options (display format, newline handling, reconnect)
    #[serde(default)]
    pub options: SessionOptionsParams,

    /// Connect right away (default: true)
    #[serde(default = "default_true")]
    pub connect: bool,
}

fn default_true() -> bool {
    true
}

/// Response for serial_session_create
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionCreateResponse {
    /// Unique session identifier
    pub session_id: String,

    /// Session details
    pub session: SessionInfo,

    /// Result message
    pub message: String,
}

/// Parameters for serial_session_list
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionListParams {}

/// Response for serial_session_list
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionListResponse {
    /// All sessions
    pub sessions: Vec<SessionInfo>,

    /// Total count
    pub count: usize,
}

/// Parameters for serial_session_close
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionCloseParams {
    /// Session to close
    pub session_id: String,
}

/// Generic response for tools acting on one session
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionResponse {
    /// Session acted on
    pub session_id: String,

    /// State after the operation
    pub state: SessionState,

    /// Result message
    pub message: String,
}

// =============================================================================
// Connection Tools
// =============================================================================

/// Parameters for serial_connect
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConnectParams {
    /// Session to connect
    pub session_id: String,

    /// Port to open
    #[serde(default)]
    pub port: PortSelection,

    /// Line settings
    #[serde(default)]
    pub line: LineSettings,
}

/// Parameters for serial_disconnect
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DisconnectParams {
    /// Session to disconnect
    pub session_id: String,
}

// =============================================================================
// Data Tools
// =============================================================================

/// Parameters for serial_send
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SendParams {
    /// Session to write to
    pub session_id: String,

    /// Text to send; the session's line terminator is appended
    pub text: String,
}

/// Response for serial_send
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SendResponse {
    /// Session written to
    pub session_id: String,

    /// Number of characters sent, without the terminator
    pub chars_sent: usize,

    /// Result message
    pub message: String,
}

/// Parameters for serial_read_log
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReadLogParams {
    /// Session to read from
    pub session_id: String,

    /// Only return events not returned by a previous call (default: true)
    #[serde(default = "default_true")]
    pub since_last: bool,

    /// Return at most this many of the newest events
    #[serde(default)]
    pub max_events: Option<usize>,
}

/// One log event in display form.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LogEntry {
    /// "sent", "received", "error" or "notice"
    pub kind: String,

    /// RFC 3339 capture time
    pub timestamp: String,

    /// Text, or a hex dump in binary mode
    pub text: String,

    /// Whether the line is still being received
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub partial: bool,

    /// Failure classification
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fault: Option<ErrorKind>,
}

impl From<&LogEvent> for LogEntry {
    fn from(event: &LogEvent) -> Self {
        let kind = match event.kind {
            LogKind::Sent => "sent",
            LogKind::Received => "received",
            LogKind::Error => "error",
            LogKind::Notice => "notice",
        };
        Self {
            kind: kind.to_string(),
            timestamp: event.timestamp.to_rfc3339(),
            text: event.text().into_owned(),
            partial: event.is_partial,
            fault: event.fault,
        }
    }
}

/// Convert events, keeping only the newest `max` when a limit is given.
pub fn log_entries(events: &[LogEvent], max: Option<usize>) -> Vec<LogEntry> {
    let skip = max.map_or(0, |max| events.len().saturating_sub(max));
    events.iter().skip(skip).map(LogEntry::from).collect()
}

/// Response for serial_read_log
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReadLogResponse {
    /// Session read from
    pub session_id: String,

    /// Session state
    pub state: SessionState,

    /// Log events, oldest first
    pub events: Vec<LogEntry>,

    /// Number of events returned
    pub count: usize,
}

/// Parameters for serial_clear_log
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClearLogParams {
    /// Session whose log to clear
    pub session_id: String,
}

/// Parameters for serial_export_log
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExportLogParams {
    /// Session to export
    pub session_id: String,

    /// "text" (default) or "json_lines"
    #[serde(default)]
    pub format: ExportFormat,

    /// File to write; when omitted the log is returned inline
    #[serde(default)]
    pub path: Option<String>,
}

/// Response for serial_export_log
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExportLogResponse {
    /// Session exported
    pub session_id: String,

    /// Number of events exported
    pub event_count: usize,

    /// File written, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Rendered log, when no path was given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

// =============================================================================
// Option Tools
// =============================================================================

/// Session options. Fields left out are unchanged (or take server defaults
/// when creating a session).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SessionOptionsParams {
    /// "text" or "binary"
    #[serde(default)]
    pub display_format: Option<DisplayFormat>,

    /// Inbound line separator: "lf", "cr", "crlf" or "any"
    #[serde(default)]
    pub newline: Option<NewlinePolicy>,

    /// Terminator appended to sent text: "none", "lf", "cr" or "crlf"
    #[serde(default)]
    pub line_terminator: Option<LineTerminator>,

    /// Reconnect automatically when the device is unplugged and returns
    #[serde(default)]
    pub reconnect: Option<bool>,
}

impl SessionOptionsParams {
    /// Overwrite the fields that are set.
    pub fn apply_to(&self, options: &mut SessionOptions) {
        if let Some(format) = self.display_format {
            options.display_format = format;
        }
        if let Some(newline) = self.newline {
            options.newline = newline;
        }
        if let Some(terminator) = self.line_terminator {
            options.line_terminator = terminator;
        }
        if let Some(enabled) = self.reconnect {
            options.reconnect_enabled = enabled;
        }
    }
}

/// Parameters for serial_set_options
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SetOptionsParams {
    /// Session to configure
    pub session_id: String,

    /// Options to change
    #[serde(flatten)]
    pub options: SessionOptionsParams,
}

/// Response for serial_set_options
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SetOptionsResponse {
    /// Session configured
    pub session_id: String,

    /// Display format in effect
    pub display_format: DisplayFormat,

    /// Newline policy in effect
    pub newline: NewlinePolicy,

    /// Line terminator in effect
    pub line_terminator: LineTerminator,

    /// Whether auto-reconnect is enabled
    pub reconnect: bool,
}

// =============================================================================
// Wait Tools
// =============================================================================

/// Parameters for serial_wait_for
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WaitForParams {
    /// Session to wait on
    pub session_id: String,

    /// Regex to find in a line received after the call
    #[serde(default)]
    pub text: Option<String>,

    /// State the session must reach
    #[serde(default)]
    pub state: Option<SessionState>,

    /// Timeout in milliseconds (default: 5000)
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Polling interval in milliseconds (default: 100)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_timeout() -> u64 {
    5000
}

fn default_poll_interval() -> u64 {
    100
}

impl WaitForParams {
    /// Build the session wait condition.
    pub fn condition(&self) -> WaitCondition {
        WaitCondition {
            text: self.text.clone(),
            state: self.state,
            timeout: Duration::from_millis(self.timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }
}

/// Response for serial_wait_for
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WaitForResponse {
    /// Session that was waited on
    pub session_id: String,

    /// Whether the condition was met
    pub condition_met: bool,

    /// Time waited in milliseconds
    pub waited_ms: u64,

    /// Session state when the wait ended
    pub state: SessionState,

    /// Received line that matched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,

    /// Events logged during the wait
    pub events: Vec<LogEntry>,
}

impl WaitForResponse {
    /// Build the response from a wait result.
    pub fn new(session_id: String, result: &WaitResult) -> Self {
        Self {
            session_id,
            condition_met: result.condition_met,
            waited_ms: result.waited_ms,
            state: result.state,
            matched: result.matched.clone(),
            events: log_entries(&result.events, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_session_create_params_defaults() {
        let params: SessionCreateParams = serde_json::from_str("{}").unwrap();
        assert!(params.connect);
        assert!(params.port.port_name.is_none());
        assert!(params.line.baud_rate.is_none());
        assert!(params.options.reconnect.is_none());
    }

    #[test]
    fn test_session_create_params_nested() {
        let json = r#"{
            "port": {"port_name": "/dev/ttyUSB0"},
            "line": {"baud_rate": 9600, "data_bits": 7, "parity": "even"},
            "options": {"newline": "crlf", "reconnect": false}
        }"#;
        let params: SessionCreateParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.port.port_name.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(params.options.newline, Some(NewlinePolicy::CrLf));
        assert_eq!(params.options.reconnect, Some(false));

        let config = params.line.resolve(ConnectionConfig::default()).unwrap();
        assert_eq!(config.shorthand(), "9600 7E1");
    }

    #[test]
    fn test_line_settings_rejects_bad_values() {
        let defaults = ConnectionConfig::default();
        let bad_bits = LineSettings {
            data_bits: Some(9),
            ..Default::default()
        };
        assert!(bad_bits.resolve(defaults).is_err());

        let zero_baud = LineSettings {
            baud_rate: Some(0),
            ..Default::default()
        };
        assert!(zero_baud.resolve(defaults).is_err());

        assert_eq!(LineSettings::default().resolve(defaults).unwrap(), defaults);
    }

    #[test]
    fn test_options_apply_only_set_fields() {
        let mut options = SessionOptions::default();
        let params = SessionOptionsParams {
            line_terminator: Some(LineTerminator::CrLf),
            reconnect: Some(false),
            ..Default::default()
        };
        params.apply_to(&mut options);
        assert_eq!(options.line_terminator, LineTerminator::CrLf);
        assert!(!options.reconnect_enabled);
        assert_eq!(options.display_format, SessionOptions::default().display_format);
        assert_eq!(options.newline, SessionOptions::default().newline);
    }

    #[test]
    fn test_port_selection_identity_needs_both_ids() {
        let selection = PortSelection {
            vendor_id: Some(0x2341),
            ..Default::default()
        };
        assert!(selection.to_request().is_err());

        let selection = PortSelection {
            vendor_id: Some(0x2341),
            product_id: Some(0x0043),
            ..Default::default()
        };
        let request = selection.to_request().unwrap();
        assert_eq!(request.identity, Some(DeviceIdentity::new(0x2341, 0x0043)));
        assert!(request.port_name.is_none());
    }

    #[test]
    fn test_set_options_params_flattened() {
        let json = r#"{"session_id": "abc", "display_format": "binary"}"#;
        let params: SetOptionsParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.session_id, "abc");
        assert_eq!(params.options.display_format, Some(DisplayFormat::Binary));
        assert!(params.options.line_terminator.is_none());
    }

    #[test]
    fn test_wait_for_params_condition() {
        let json = r#"{"session_id": "abc", "text": "OK", "state": "connected"}"#;
        let params: WaitForParams = serde_json::from_str(json).unwrap();
        let condition = params.condition();
        assert_eq!(condition.text.as_deref(), Some("OK"));
        assert_eq!(condition.state, Some(SessionState::Connected));
        assert_eq!(condition.timeout, Duration::from_millis(5000));
        assert_eq!(condition.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_log_entries_keep_newest() {
        let events = vec![
            LogEvent::sent("AT"),
            LogEvent::received_line("OK", Utc::now()),
            LogEvent::received_bytes(vec![0x0A, 0xFF]),
        ];
        let entries = log_entries(&events, Some(2));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, "received");
        assert_eq!(entries[0].text, "OK");
        assert_eq!(entries[1].text, "0A FF");

        assert_eq!(log_entries(&events, None).len(), 3);
        assert_eq!(log_entries(&events, Some(10)).len(), 3);
    }

    #[test]
    fn test_log_entry_serialization_skips_defaults() {
        let entry = LogEntry::from(&LogEvent::notice("connected"));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "notice");
        assert!(json.get("partial").is_none());
        assert!(json.get("fault").is_none());

        let entry = LogEntry::from(&LogEvent::error(ErrorKind::WriteFailed, "broken"));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["fault"], "WriteFailed");
    }
}
