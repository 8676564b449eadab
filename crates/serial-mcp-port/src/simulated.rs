//! In-memory ports for tests and offline use.
//!
//! A [`SimulatedPort`] plays the device side of a connection: tests inject
//! inbound bytes, end-of-stream, device removal or read failures, and
//! inspect what was written. A [`SimulatedBus`] is the matching
//! [`PortDiscovery`] that tracks which ports are plugged in and authorised.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use serial_mcp_core::{
    ConnectionConfig, DeviceIdentity, OpenError, ReadError, UserCancelled, WriteError,
};

use crate::lock;
use crate::port::{PortDiscovery, PortHandle, PortRequest};

#[derive(Debug)]
enum Inbound {
    Data(Vec<u8>),
    Eof,
    Removed,
    Cancelled,
    Fail(String),
}

/// A fully in-memory serial device.
#[derive(Debug)]
pub struct SimulatedPort {
    name: String,
    identity: Option<DeviceIdentity>,
    open: AtomicBool,
    present: AtomicBool,
    open_count: AtomicUsize,
    config: Mutex<Option<ConnectionConfig>>,
    open_failure: Mutex<Option<String>>,
    write_failure: Mutex<Option<String>>,
    inbound: Mutex<VecDeque<Inbound>>,
    tx: Mutex<Vec<u8>>,
    notify: Notify,
}

impl SimulatedPort {
    /// Create a plugged-in, closed port.
    pub fn new(name: impl Into<String>, identity: Option<DeviceIdentity>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            identity,
            open: AtomicBool::new(false),
            present: AtomicBool::new(true),
            open_count: AtomicUsize::new(0),
            config: Mutex::new(None),
            open_failure: Mutex::new(None),
            write_failure: Mutex::new(None),
            inbound: Mutex::new(VecDeque::new()),
            tx: Mutex::new(Vec::new()),
            notify: Notify::new(),
        })
    }

    /// Deliver bytes to the next read.
    pub fn inject(&self, bytes: &[u8]) {
        self.push(Inbound::Data(bytes.to_vec()));
    }

    /// Make the next read report a clean end of stream.
    pub fn inject_eof(&self) {
        self.push(Inbound::Eof);
    }

    /// Make the next read fail with a non-removal error.
    pub fn inject_read_error(&self, message: impl Into<String>) {
        self.push(Inbound::Fail(message.into()));
    }

    /// Make the next read report [`ReadError::Cancelled`] while the port
    /// stays open, as a backend that gives up on its own would.
    pub fn inject_cancelled(&self) {
        self.push(Inbound::Cancelled);
    }

    /// Physically remove the device.
    ///
    /// A pending read fails with [`ReadError::DeviceRemoved`], and the port
    /// can no longer be opened or discovered until [`plug_in`](Self::plug_in).
    pub fn unplug(&self) {
        debug!("Unplugging simulated port {}", self.name);
        self.present.store(false, Ordering::SeqCst);
        self.push(Inbound::Removed);
    }

    /// Make a removed device available again.
    pub fn plug_in(&self) {
        debug!("Plugging in simulated port {}", self.name);
        self.present.store(true, Ordering::SeqCst);
    }

    /// Whether the device is plugged in.
    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    /// Whether the port is currently open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Number of successful opens so far.
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Line settings of the most recent successful open.
    pub fn last_config(&self) -> Option<ConnectionConfig> {
        *lock(&self.config)
    }

    /// Make every open fail with `message` until cleared with `None`.
    pub fn fail_opens(&self, message: Option<&str>) {
        *lock(&self.open_failure) = message.map(str::to_string);
    }

    /// Make every write fail with `message` until cleared with `None`.
    pub fn fail_writes(&self, message: Option<&str>) {
        *lock(&self.write_failure) = message.map(str::to_string);
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.tx).clone()
    }

    /// Take everything written so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut *lock(&self.tx))
    }

    fn push(&self, item: Inbound) {
        lock(&self.inbound).push_back(item);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl PortHandle for SimulatedPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> Option<DeviceIdentity> {
        self.identity
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<(), OpenError> {
        if !self.is_present() {
            return Err(OpenError(format!("{}: no such device", self.name)));
        }
        if let Some(message) = lock(&self.open_failure).clone() {
            return Err(OpenError(message));
        }
        if self.open.swap(true, Ordering::SeqCst) {
            return Err(OpenError(format!("{}: port already open", self.name)));
        }
        *lock(&self.config) = Some(*config);
        self.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            lock(&self.inbound).clear();
        }
        self.notify.notify_waiters();
    }

    async fn read_chunk(&self) -> Result<Option<Vec<u8>>, ReadError> {
        loop {
            // Register before checking so a push between the check and the
            // await is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_open() {
                return Err(ReadError::Cancelled);
            }
            let next = lock(&self.inbound).pop_front();
            match next {
                Some(Inbound::Data(bytes)) => return Ok(Some(bytes)),
                Some(Inbound::Eof) => return Ok(None),
                Some(Inbound::Removed) => return Err(ReadError::DeviceRemoved),
                Some(Inbound::Cancelled) => return Err(ReadError::Cancelled),
                Some(Inbound::Fail(message)) => return Err(ReadError::Other(message)),
                None => notified.await,
            }
        }
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), WriteError> {
        if !self.is_open() {
            return Err(WriteError(format!("{}: port not open", self.name)));
        }
        if let Some(message) = lock(&self.write_failure).clone() {
            return Err(WriteError(message));
        }
        lock(&self.tx).extend_from_slice(bytes);
        Ok(())
    }
}

#[derive(Debug)]
struct BusEntry {
    port: Arc<SimulatedPort>,
    authorized: bool,
}

/// Discovery over a set of [`SimulatedPort`]s.
///
/// Ports added with [`add_port`](Self::add_port) are visible to
/// `request_new_port` and become authorised once picked there;
/// [`authorize`](Self::authorize) grants them up front.
#[derive(Debug, Default)]
pub struct SimulatedBus {
    entries: Mutex<Vec<BusEntry>>,
    list_calls: AtomicUsize,
    request_calls: AtomicUsize,
    cancel_requests: AtomicBool,
}

impl SimulatedBus {
    /// Create an empty bus.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `port` known to the bus without authorising it.
    pub fn add_port(&self, port: Arc<SimulatedPort>) {
        self.insert(port, false);
    }

    /// Make `port` known and already authorised.
    pub fn authorize(&self, port: Arc<SimulatedPort>) {
        self.insert(port, true);
    }

    /// Simulate the user dismissing every port picker until reset.
    pub fn cancel_requests(&self, cancel: bool) {
        self.cancel_requests.store(cancel, Ordering::SeqCst);
    }

    /// Number of `list_authorized_ports` calls so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `request_new_port` calls so far.
    pub fn request_calls(&self) -> usize {
        self.request_calls.load(Ordering::SeqCst)
    }

    fn insert(&self, port: Arc<SimulatedPort>, authorized: bool) {
        let mut entries = lock(&self.entries);
        match entries.iter_mut().find(|e| Arc::ptr_eq(&e.port, &port)) {
            Some(entry) => entry.authorized |= authorized,
            None => entries.push(BusEntry { port, authorized }),
        }
    }
}

#[async_trait]
impl PortDiscovery for SimulatedBus {
    async fn list_authorized_ports(&self) -> Vec<Arc<dyn PortHandle>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.entries)
            .iter()
            .filter(|e| e.authorized && e.port.is_present())
            .map(|e| Arc::clone(&e.port) as Arc<dyn PortHandle>)
            .collect()
    }

    async fn request_new_port(
        &self,
        request: &PortRequest,
    ) -> Result<Arc<dyn PortHandle>, UserCancelled> {
        self.request_calls.fetch_add(1, Ordering::SeqCst);
        if self.cancel_requests.load(Ordering::SeqCst) {
            return Err(UserCancelled);
        }

        let mut entries = lock(&self.entries);
        let entry = entries
            .iter_mut()
            .find(|e| e.port.is_present() && request.matches(e.port.as_ref()))
            .ok_or(UserCancelled)?;
        entry.authorized = true;
        Ok(Arc::clone(&entry.port) as Arc<dyn PortHandle>)
    }
}
