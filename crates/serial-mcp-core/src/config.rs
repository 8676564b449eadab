//! Configuration types for Serial MCP Server.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{
    ConnectionConfig, DataBits, DisplayFormat, Error, LineTerminator, NewlinePolicy, Parity,
    StopBits,
};

/// Server configuration loaded from YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Server settings
    pub server: ServerSettings,
    /// Serial line defaults
    pub serial: SerialSettings,
    /// Auto-reconnect settings
    pub reconnect: ReconnectSettings,
    /// Port discovery settings
    pub discovery: DiscoverySettings,
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        let config: ServerConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.max_sessions == 0 {
            return Err(Error::Config("server.max_sessions must be > 0".to_string()));
        }

        if self.serial.baud_rate == 0 {
            return Err(Error::Config("serial.baud_rate must be > 0".to_string()));
        }

        if self.reconnect.interval_ms == 0 {
            return Err(Error::Config(
                "reconnect.interval_ms must be > 0".to_string(),
            ));
        }

        self.discovery.validate()
    }
}

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Transport type (stdio)
    pub transport: String,
    /// Maximum number of concurrent sessions
    pub max_sessions: usize,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            transport: "stdio".to_string(),
            max_sessions: 10,
            log_level: "info".to_string(),
        }
    }
}

/// Defaults applied to new sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits
    pub data_bits: DataBits,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Parity
    pub parity: Parity,
    /// How received bytes are displayed
    pub display_format: DisplayFormat,
    /// Inbound line separator convention
    pub newline: NewlinePolicy,
    /// Terminator appended to sent text
    pub line_terminator: LineTerminator,
    /// Maximum events kept in a session log (0 = unbounded)
    pub log_capacity: usize,
}

impl SerialSettings {
    /// Line settings described by these defaults.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            display_format: DisplayFormat::Text,
            newline: NewlinePolicy::Any,
            line_terminator: LineTerminator::Lf,
            log_capacity: 10_000,
        }
    }
}

/// Auto-reconnect settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Whether sessions try to reopen a removed device
    pub enabled: bool,
    /// Poll interval while waiting for the device, in milliseconds
    pub interval_ms: u64,
}

impl ReconnectSettings {
    /// Poll interval as a duration.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.interval_ms)
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 2000,
        }
    }
}

/// Port discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Only ports whose name matches this regex are offered
    pub port_name_pattern: Option<String>,
    /// Only offer USB ports (the only kind with an identity)
    pub usb_only: bool,
}

impl DiscoverySettings {
    /// Validate the discovery filter.
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(pattern) = &self.port_name_pattern {
            regex::Regex::new(pattern).map_err(|e| {
                Error::Config(format!("Invalid port_name_pattern '{pattern}': {e}"))
            })?;
        }
        Ok(())
    }

    /// Compiled name filter, if one is configured.
    pub fn name_filter(&self) -> crate::Result<Option<regex::Regex>> {
        self.port_name_pattern
            .as_deref()
            .map(regex::Regex::new)
            .transpose()
            .map_err(|e| Error::Config(e.to_string()))
    }
}
