//! Session types for serial session management.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DeviceIdentity;

/// Unique identifier for a serial session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Connection lifecycle state of a session.
///
/// A port is held by the session exactly while it is `Connected` or
/// `Disconnecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No port held
    #[default]
    Disconnected,
    /// Acquiring and opening a port
    Connecting,
    /// Port open, read loop running
    Connected,
    /// Tearing down an open port
    Disconnecting,
    /// Device was removed; polling for it to come back
    ReconnectWaiting,
}

impl SessionState {
    /// Whether a port is held in this state.
    pub fn holds_port(self) -> bool {
        matches!(self, Self::Connected | Self::Disconnecting)
    }

    /// Whether `connect` is accepted in this state.
    pub fn can_connect(self) -> bool {
        matches!(self, Self::Disconnected | Self::ReconnectWaiting)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::ReconnectWaiting => "waiting to reconnect",
        };
        f.write_str(label)
    }
}

/// Information about a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionInfo {
    /// Session identifier
    pub id: SessionId,
    /// Current state
    pub state: SessionState,
    /// Name of the port last used
    pub port_name: Option<String>,
    /// Identity of the device last opened
    pub identity: Option<DeviceIdentity>,
    /// Line settings shorthand (e.g. `115200 8N1`)
    pub config: Option<String>,
    /// Whether auto-reconnect is enabled
    pub reconnect_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_creation() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_session_id_display() {
        let id = SessionId::new();
        let display = format!("{id}");
        assert_eq!(display.len(), 36);
    }

    #[test]
    fn test_session_id_parse_round_trip() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }

    #[test]
    fn test_port_held_only_when_connected_or_disconnecting() {
        assert!(SessionState::Connected.holds_port());
        assert!(SessionState::Disconnecting.holds_port());
        assert!(!SessionState::Disconnected.holds_port());
        assert!(!SessionState::Connecting.holds_port());
        assert!(!SessionState::ReconnectWaiting.holds_port());
    }

    #[test]
    fn test_can_connect() {
        assert!(SessionState::Disconnected.can_connect());
        assert!(SessionState::ReconnectWaiting.can_connect());
        assert!(!SessionState::Connected.can_connect());
        assert!(!SessionState::Connecting.can_connect());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&SessionState::ReconnectWaiting).unwrap();
        assert_eq!(json, "\"reconnect_waiting\"");
    }

    #[test]
    fn test_session_info_serialization() {
        let info = SessionInfo {
            id: SessionId::new(),
            state: SessionState::Connected,
            port_name: Some("/dev/ttyUSB0".to_string()),
            identity: Some(DeviceIdentity::new(0x0403, 0x6001)),
            config: Some("115200 8N1".to_string()),
            reconnect_enabled: true,
        };

        let json = serde_json::to_string(&info).unwrap();
        let deserialized: SessionInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, info);
    }
}
