//! Device boundary: the port and port discovery traits.
//!
//! Everything above this module talks to devices only through
//! [`PortHandle`] and [`PortDiscovery`]. Backends (the in-memory
//! [`SimulatedBus`](crate::SimulatedBus), the `serialport`-backed
//! [`NativeDiscovery`](crate::NativeDiscovery)) implement them.

use std::sync::Arc;

use async_trait::async_trait;

use serial_mcp_core::{
    ConnectionConfig, DeviceIdentity, OpenError, ReadError, UserCancelled, WriteError,
};

/// An opaque device connection.
///
/// Implementations must be `Send + Sync`: the session reads on one task while
/// writes arrive from others, so `read_chunk` and `write` may run
/// concurrently.
#[async_trait]
pub trait PortHandle: Send + Sync {
    /// Platform name of the port (e.g. `/dev/ttyUSB0`, `COM3`).
    fn name(&self) -> &str;

    /// Stable device fingerprint, if the port exposes one.
    fn identity(&self) -> Option<DeviceIdentity>;

    /// Open the port with the given line settings.
    async fn open(&self, config: &ConnectionConfig) -> Result<(), OpenError>;

    /// Close the port. Idempotent; never fails.
    ///
    /// A read pending at the time of the call returns
    /// [`ReadError::Cancelled`].
    async fn close(&self);

    /// Wait for the next chunk of inbound bytes.
    ///
    /// `Ok(None)` signals a clean end of stream.
    async fn read_chunk(&self) -> Result<Option<Vec<u8>>, ReadError>;

    /// Write all of `bytes`.
    async fn write(&self, bytes: &[u8]) -> Result<(), WriteError>;
}

impl std::fmt::Debug for dyn PortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortHandle")
            .field("name", &self.name())
            .field("identity", &self.identity())
            .finish()
    }
}

/// Criteria for picking a new port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortRequest {
    /// Exact port name
    pub port_name: Option<String>,
    /// Device identity
    pub identity: Option<DeviceIdentity>,
}

impl PortRequest {
    /// Request any available port.
    pub fn any() -> Self {
        Self::default()
    }

    /// Request a port by name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            port_name: Some(name.into()),
            identity: None,
        }
    }

    /// Request a port by device identity.
    pub fn with_identity(identity: DeviceIdentity) -> Self {
        Self {
            port_name: None,
            identity: Some(identity),
        }
    }

    /// Whether `port` satisfies every criterion that is set.
    pub fn matches(&self, port: &dyn PortHandle) -> bool {
        let name_ok = self
            .port_name
            .as_deref()
            .map_or(true, |name| name == port.name());
        let identity_ok = self
            .identity
            .map_or(true, |identity| port.identity() == Some(identity));
        name_ok && identity_ok
    }
}

/// Source of ports.
#[async_trait]
pub trait PortDiscovery: Send + Sync {
    /// Ports currently present that the user has already authorised.
    async fn list_authorized_ports(&self) -> Vec<Arc<dyn PortHandle>>;

    /// Let the user pick a new port. Used only for explicit connects.
    async fn request_new_port(
        &self,
        request: &PortRequest,
    ) -> Result<Arc<dyn PortHandle>, UserCancelled>;
}
