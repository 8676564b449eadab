//! Operating-system serial ports via the `serialport` crate.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use tokio::task;
use tracing::{debug, info, warn};

use serial_mcp_core::{
    ConnectionConfig, DataBits, DeviceIdentity, DiscoverySettings, OpenError, Parity, ReadError,
    Result, StopBits, UserCancelled, WriteError,
};

use crate::lock;
use crate::port::{PortDiscovery, PortHandle, PortRequest};

/// How long a blocking read waits before checking whether the port was closed.
const READ_POLL: Duration = Duration::from_millis(100);

const READ_BUFFER_SIZE: usize = 4096;

type SharedPort = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

enum Poll {
    Data(Vec<u8>),
    Idle,
    Eof,
}

/// A serial port on this machine.
pub struct NativePort {
    name: String,
    identity: Option<DeviceIdentity>,
    reader: SharedPort,
    writer: SharedPort,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for NativePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativePort")
            .field("name", &self.name)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl NativePort {
    /// Handle for the port at `name`. Nothing is opened yet.
    pub fn new(name: impl Into<String>, identity: Option<DeviceIdentity>) -> Self {
        Self {
            name: name.into(),
            identity,
            reader: Arc::new(Mutex::new(None)),
            writer: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(true)),
        }
    }

    fn from_info(info: &SerialPortInfo) -> Self {
        Self::new(info.port_name.clone(), identity_of(info))
    }
}

fn identity_of(info: &SerialPortInfo) -> Option<DeviceIdentity> {
    match &info.port_type {
        SerialPortType::UsbPort(usb) => Some(DeviceIdentity::new(usb.vid, usb.pid)),
        _ => None,
    }
}

fn data_bits(bits: DataBits) -> serialport::DataBits {
    match bits {
        DataBits::Five => serialport::DataBits::Five,
        DataBits::Six => serialport::DataBits::Six,
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    }
}

fn stop_bits(bits: StopBits) -> serialport::StopBits {
    match bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}

fn parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
    }
}

/// Errors that mean the device is gone rather than merely misbehaving.
fn is_removal(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected
    ) {
        return true;
    }
    // EIO, ENXIO, ENODEV on Unix; access denied / invalid handle on Windows.
    matches!(err.raw_os_error(), Some(5 | 6 | 19))
}

#[async_trait]
impl PortHandle for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> Option<DeviceIdentity> {
        self.identity
    }

    async fn open(&self, config: &ConnectionConfig) -> std::result::Result<(), OpenError> {
        info!("Opening {} at {}", self.name, config.shorthand());

        let builder = serialport::new(&self.name, config.baud_rate)
            .data_bits(data_bits(config.data_bits))
            .stop_bits(stop_bits(config.stop_bits))
            .parity(parity(config.parity))
            .timeout(READ_POLL);

        let port = task::spawn_blocking(move || builder.open())
            .await
            .map_err(|e| OpenError(format!("open task failed: {e}")))?
            .map_err(|e| OpenError(format!("{}: {e}", self.name)))?;
        let writer = port
            .try_clone()
            .map_err(|e| OpenError(format!("{}: {e}", self.name)))?;

        *lock(&self.reader) = Some(port);
        *lock(&self.writer) = Some(writer);
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Closing {}", self.name);

        // A blocking read may hold the reader for up to READ_POLL.
        let reader = Arc::clone(&self.reader);
        let writer = Arc::clone(&self.writer);
        let _ = task::spawn_blocking(move || {
            lock(&writer).take();
            lock(&reader).take();
        })
        .await;
    }

    async fn read_chunk(&self) -> std::result::Result<Option<Vec<u8>>, ReadError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ReadError::Cancelled);
            }

            let reader = Arc::clone(&self.reader);
            let poll = task::spawn_blocking(move || {
                let mut guard = lock(&reader);
                let Some(port) = guard.as_mut() else {
                    return Err(ReadError::Cancelled);
                };
                let mut buffer = vec![0u8; READ_BUFFER_SIZE];
                match port.read(&mut buffer) {
                    Ok(0) => Ok(Poll::Eof),
                    Ok(n) => {
                        buffer.truncate(n);
                        Ok(Poll::Data(buffer))
                    }
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Poll::Idle),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Poll::Idle),
                    Err(e) if is_removal(&e) => Err(ReadError::DeviceRemoved),
                    Err(e) => Err(ReadError::Other(e.to_string())),
                }
            })
            .await
            .map_err(|e| ReadError::Other(format!("read task failed: {e}")))?;

            match poll {
                Ok(Poll::Data(bytes)) => return Ok(Some(bytes)),
                Ok(Poll::Idle) => continue,
                Ok(Poll::Eof) => return Ok(None),
                // Errors raised while closing are not the device's fault.
                Err(_) if self.closed.load(Ordering::SeqCst) => return Err(ReadError::Cancelled),
                Err(e) => return Err(e),
            }
        }
    }

    async fn write(&self, bytes: &[u8]) -> std::result::Result<(), WriteError> {
        let writer = Arc::clone(&self.writer);
        let bytes = bytes.to_vec();
        task::spawn_blocking(move || {
            let mut guard = lock(&writer);
            let port = guard
                .as_mut()
                .ok_or_else(|| WriteError("port not open".to_string()))?;
            port.write_all(&bytes)
                .and_then(|_| port.flush())
                .map_err(|e| WriteError(e.to_string()))
        })
        .await
        .map_err(|e| WriteError(format!("write task failed: {e}")))?
    }
}

/// Discovery over the ports the operating system reports.
///
/// There is no permission prompt for local ports, so every enumerated port
/// that passes the configured filter counts as authorised.
#[derive(Debug, Clone)]
pub struct NativeDiscovery {
    name_filter: Option<Regex>,
    usb_only: bool,
}

impl NativeDiscovery {
    /// Create discovery with the given filter settings.
    pub fn new(settings: &DiscoverySettings) -> Result<Self> {
        Ok(Self {
            name_filter: settings.name_filter()?,
            usb_only: settings.usb_only,
        })
    }

    fn accepts(&self, info: &SerialPortInfo) -> bool {
        if self.usb_only && !matches!(info.port_type, SerialPortType::UsbPort(_)) {
            return false;
        }
        self.name_filter
            .as_ref()
            .map_or(true, |filter| filter.is_match(&info.port_name))
    }

    async fn enumerate(&self) -> Vec<SerialPortInfo> {
        match task::spawn_blocking(serialport::available_ports).await {
            Ok(Ok(ports)) => ports.into_iter().filter(|p| self.accepts(p)).collect(),
            Ok(Err(e)) => {
                warn!("Failed to enumerate serial ports: {}", e);
                Vec::new()
            }
            Err(e) => {
                warn!("Port enumeration task failed: {}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl PortDiscovery for NativeDiscovery {
    async fn list_authorized_ports(&self) -> Vec<Arc<dyn PortHandle>> {
        self.enumerate()
            .await
            .iter()
            .map(|info| Arc::new(NativePort::from_info(info)) as Arc<dyn PortHandle>)
            .collect()
    }

    async fn request_new_port(
        &self,
        request: &PortRequest,
    ) -> std::result::Result<Arc<dyn PortHandle>, UserCancelled> {
        let ports: Vec<NativePort> = self
            .enumerate()
            .await
            .iter()
            .map(NativePort::from_info)
            .collect();

        if let Some(port) = ports.into_iter().find(|p| request.matches(p)) {
            return Ok(Arc::new(port));
        }

        // Ports the OS does not enumerate (pseudo-terminals, some virtual
        // adapters) can still be opened by exact name.
        match (&request.port_name, request.identity) {
            (Some(name), None) if self.name_filter.as_ref().map_or(true, |f| f.is_match(name)) => {
                debug!("Port {} not enumerated, using it by name", name);
                Ok(Arc::new(NativePort::new(name.clone(), None)))
            }
            _ => Err(UserCancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    fn usb(name: &str, vid: u16, pid: u16) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid,
                pid,
                serial_number: None,
                manufacturer: None,
                product: None,
            }),
        }
    }

    fn builtin(name: &str) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::Unknown,
        }
    }

    #[test]
    fn test_identity_from_usb_info() {
        let port = NativePort::from_info(&usb("/dev/ttyUSB0", 0x0403, 0x6001));
        assert_eq!(port.identity(), Some(DeviceIdentity::new(0x0403, 0x6001)));
        assert!(NativePort::from_info(&builtin("/dev/ttyS0"))
            .identity()
            .is_none());
    }

    #[test]
    fn test_discovery_filters() {
        let settings = DiscoverySettings {
            port_name_pattern: Some("^/dev/ttyUSB".to_string()),
            usb_only: false,
        };
        let discovery = NativeDiscovery::new(&settings).unwrap();
        assert!(discovery.accepts(&usb("/dev/ttyUSB0", 1, 2)));
        assert!(!discovery.accepts(&builtin("/dev/ttyS0")));

        let usb_only = NativeDiscovery::new(&DiscoverySettings {
            port_name_pattern: None,
            usb_only: true,
        })
        .unwrap();
        assert!(usb_only.accepts(&usb("COM3", 1, 2)));
        assert!(!usb_only.accepts(&builtin("COM1")));
    }

    #[test]
    fn test_removal_errors() {
        assert!(is_removal(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_removal(&io::Error::from_raw_os_error(5)));
        assert!(!is_removal(&io::Error::from(io::ErrorKind::InvalidData)));
    }

    #[tokio::test]
    async fn test_read_on_closed_port_is_cancelled() {
        let port = NativePort::new("/dev/null-serial", None);
        assert_eq!(port.read_chunk().await, Err(ReadError::Cancelled));
        assert!(port.write(b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let port = NativePort::new("/definitely/not/a/serial/port", None);
        assert!(port.open(&ConnectionConfig::default()).await.is_err());
    }
}
