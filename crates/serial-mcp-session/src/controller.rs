//! Session controller: the connection lifecycle of one serial session.
//!
//! A [`SessionController`] owns at most one open port, runs the read loop
//! that feeds the [`StreamDecoder`], serializes writes, and walks the
//! reconnect cycle when the device disappears:
//!
//! ```text
//! Disconnected --connect--> Connecting --open ok--> Connected
//!      ^                        |                      |
//!      |                   open failed          EOF / read error
//!      +------------------------+                      |
//!      |                                          Disconnecting
//!      +------------------------------------------+    |
//!                                                 device removed,
//!                                                 reconnect enabled
//!                                                      |
//!                        probe found device      ReconnectWaiting
//!            Connected <---------------------------- (timer)
//! ```
//!
//! A failed open returns to the state the attempt started from, so a manual
//! connect made while waiting for a device keeps the reconnect cycle going.
//!
//! Transitions are serialized by one async lock. Each transition bumps a
//! generation number; a read loop or timer tick started under an older
//! generation finds it changed and does nothing.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, error, info, warn};

use serial_mcp_core::{
    ConnectionConfig, DeviceIdentity, DisplayFormat, Error, ErrorKind, LineTerminator, LogEvent,
    NewlinePolicy, ReadError, Result, SerialSettings, ServerConfig, SessionId, SessionInfo,
    SessionState, UserCancelled,
};
use serial_mcp_port::{PortDiscovery, PortHandle, PortRequest, StreamDecoder};

use crate::log::{LogBuffer, LogMark};
use crate::reconnect::{PeriodicTask, ReconnectPolicy, Scheduler, Tick, TokioScheduler};

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Per-session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// How received bytes are rendered
    pub display_format: DisplayFormat,
    /// Inbound line separator convention
    pub newline: NewlinePolicy,
    /// Terminator appended to sent text
    pub line_terminator: LineTerminator,
    /// Reopen the device after it is removed
    pub reconnect_enabled: bool,
    /// Poll interval while waiting for the device
    pub reconnect_interval: Duration,
    /// Maximum events kept in the log (0 = unbounded)
    pub log_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for SessionOptions {
    fn from(config: &ServerConfig) -> Self {
        let SerialSettings {
            display_format,
            newline,
            line_terminator,
            log_capacity,
            ..
        } = config.serial;
        Self {
            display_format,
            newline,
            line_terminator,
            reconnect_enabled: config.reconnect.enabled,
            reconnect_interval: config.reconnect.interval(),
            log_capacity,
        }
    }
}

/// Lock a std mutex, recovering the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// How the read loop ended.
#[derive(Debug)]
enum ReadEnd {
    Eof,
    Removed,
    /// The backend gave up on the read without a disconnect asking it to.
    Cancelled,
    Failed(String),
}

#[derive(Debug)]
struct ReadLoop {
    cancel: oneshot::Sender<()>,
}

impl ReadLoop {
    fn cancel(self) {
        let _ = self.cancel.send(());
    }
}

/// State guarded by the transition lock.
#[derive(Debug, Default)]
struct Core {
    generation: u64,
    port: Option<Arc<dyn PortHandle>>,
    reader: Option<ReadLoop>,
    timer: Option<PeriodicTask>,
}

/// What the session last connected to. Kept across the reconnect cycle.
#[derive(Debug, Default, Clone)]
struct Link {
    port_name: Option<String>,
    identity: Option<DeviceIdentity>,
    config: Option<ConnectionConfig>,
}

/// Decoder plus the generation whose bytes it accepts.
#[derive(Debug)]
struct Stream {
    generation: u64,
    decoder: StreamDecoder,
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    line_terminator: LineTerminator,
    reconnect_enabled: bool,
    reconnect_interval: Duration,
}

struct Inner {
    id: SessionId,
    discovery: Arc<dyn PortDiscovery>,
    policy: ReconnectPolicy,
    scheduler: Arc<dyn Scheduler>,
    core: tokio::sync::Mutex<Core>,
    /// Port used by `send`; also the write lock
    writer: tokio::sync::Mutex<Option<Arc<dyn PortHandle>>>,
    stream: Mutex<Stream>,
    link: Mutex<Link>,
    settings: Mutex<Settings>,
    log: Mutex<LogBuffer>,
    state_tx: watch::Sender<SessionState>,
    events_tx: broadcast::Sender<LogEvent>,
}

/// One serial session.
///
/// Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Create a disconnected session using the tokio timer for reconnects.
    pub fn new(discovery: Arc<dyn PortDiscovery>, options: SessionOptions) -> Self {
        Self::with_scheduler(discovery, Arc::new(TokioScheduler), options)
    }

    /// Create a disconnected session with a custom reconnect scheduler.
    pub fn with_scheduler(
        discovery: Arc<dyn PortDiscovery>,
        scheduler: Arc<dyn Scheduler>,
        options: SessionOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let inner = Inner {
            id: SessionId::new(),
            policy: ReconnectPolicy::new(Arc::clone(&discovery)),
            discovery,
            scheduler,
            core: tokio::sync::Mutex::new(Core::default()),
            writer: tokio::sync::Mutex::new(None),
            stream: Mutex::new(Stream {
                generation: 0,
                decoder: StreamDecoder::new(options.display_format, options.newline),
            }),
            link: Mutex::new(Link::default()),
            settings: Mutex::new(Settings {
                line_terminator: options.line_terminator,
                reconnect_enabled: options.reconnect_enabled,
                reconnect_interval: options.reconnect_interval,
            }),
            log: Mutex::new(LogBuffer::with_capacity(options.log_capacity)),
            state_tx,
            events_tx,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Identity of the device last opened.
    pub fn identity(&self) -> Option<DeviceIdentity> {
        lock(&self.inner.link).identity
    }

    /// Line settings of the current or last connection.
    pub fn config(&self) -> Option<ConnectionConfig> {
        lock(&self.inner.link).config
    }

    /// Name of the port last used.
    pub fn port_name(&self) -> Option<String> {
        lock(&self.inner.link).port_name.clone()
    }

    /// Summary of the session.
    pub fn info(&self) -> SessionInfo {
        let link = lock(&self.inner.link).clone();
        SessionInfo {
            id: self.inner.id,
            state: self.state(),
            port_name: link.port_name,
            identity: link.identity,
            config: link.config.map(|c| c.shorthand()),
            reconnect_enabled: self.reconnect_enabled(),
        }
    }

    /// Watch state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Receive every log event emitted from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<LogEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Connect to a port picked through discovery.
    ///
    /// Accepted from `Disconnected` and `ReconnectWaiting`; a pending
    /// reconnect timer is cancelled first. If the user declines to pick a
    /// port, the session returns to where it was and
    /// [`Error::UserCancelled`] is returned without logging anything.
    pub async fn connect(&self, config: ConnectionConfig, request: PortRequest) -> Result<()> {
        config.validate()?;
        let inner = &self.inner;
        let mut core = inner.core.lock().await;
        let prior = inner.begin_connect(&mut core)?;

        let port = match inner.discovery.request_new_port(&request).await {
            Ok(port) => port,
            Err(UserCancelled) => {
                debug!("Session {}: port selection cancelled", inner.id);
                inner.restore(&mut core, prior);
                return Err(Error::UserCancelled);
            }
        };

        inner.open_and_start(&mut core, prior, port, config).await
    }

    /// Connect to a port the caller already resolved.
    pub async fn connect_port(
        &self,
        port: Arc<dyn PortHandle>,
        config: ConnectionConfig,
    ) -> Result<()> {
        config.validate()?;
        let inner = &self.inner;
        let mut core = inner.core.lock().await;
        let prior = inner.begin_connect(&mut core)?;
        inner.open_and_start(&mut core, prior, port, config).await
    }

    /// Close the connection and stop any reconnect attempts.
    ///
    /// Idempotent; never starts a reconnect.
    pub async fn disconnect(&self) -> Result<()> {
        let inner = &self.inner;
        let mut core = inner.core.lock().await;

        let had_port = core.port.is_some();
        if !had_port && core.timer.is_none() && self.state() == SessionState::Disconnected {
            return Ok(());
        }

        if had_port {
            inner.set_state(SessionState::Disconnecting);
        }
        inner.teardown(&mut core).await;
        inner.set_state(SessionState::Disconnected);

        if had_port {
            let name = self.port_name().unwrap_or_default();
            info!("Session {}: disconnected from {}", inner.id, name);
            inner.emit(LogEvent::notice(format!("disconnected from {name}")));
        }
        Ok(())
    }

    /// Send `text` followed by the configured line terminator.
    ///
    /// Empty text is ignored. A failed write is logged and returned, and the
    /// session stays connected.
    pub async fn send(&self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let terminator = lock(&self.inner.settings).line_terminator;
        let bytes = terminator.apply(text);

        let writer = self.inner.writer.lock().await;
        let port = writer.as_ref().ok_or(Error::NotConnected)?;

        debug!("Session {}: writing {} bytes", self.inner.id, bytes.len());
        match port.write(&bytes).await {
            Ok(()) => {
                self.inner.emit(LogEvent::sent(text));
                Ok(())
            }
            Err(e) => {
                error!("Session {}: write failed: {}", self.inner.id, e);
                self.inner
                    .emit(LogEvent::error(ErrorKind::WriteFailed, e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Change how bytes received from now on are displayed.
    pub fn set_display_format(&self, format: DisplayFormat) {
        let mut stream = lock(&self.inner.stream);
        if let Some(flushed) = stream.decoder.set_format(format) {
            self.inner.emit(flushed);
        }
    }

    /// Change the inbound line separator convention.
    pub fn set_newline_policy(&self, policy: NewlinePolicy) {
        lock(&self.inner.stream).decoder.set_policy(policy);
    }

    /// Change the terminator appended to sent text.
    pub fn set_line_terminator(&self, terminator: LineTerminator) {
        lock(&self.inner.settings).line_terminator = terminator;
    }

    /// Current display format.
    pub fn display_format(&self) -> DisplayFormat {
        lock(&self.inner.stream).decoder.format()
    }

    /// Current newline policy.
    pub fn newline_policy(&self) -> NewlinePolicy {
        lock(&self.inner.stream).decoder.policy()
    }

    /// Current line terminator.
    pub fn line_terminator(&self) -> LineTerminator {
        lock(&self.inner.settings).line_terminator
    }

    /// Whether removed devices are reopened automatically.
    pub fn reconnect_enabled(&self) -> bool {
        lock(&self.inner.settings).reconnect_enabled
    }

    /// Enable or disable auto-reconnect.
    ///
    /// Disabling while waiting for the device stops the search and leaves
    /// the session disconnected.
    pub async fn set_reconnect_enabled(&self, enabled: bool) {
        lock(&self.inner.settings).reconnect_enabled = enabled;
        if enabled {
            return;
        }

        let mut core = self.inner.core.lock().await;
        if self.state() == SessionState::ReconnectWaiting {
            self.inner.teardown(&mut core).await;
            self.inner.set_state(SessionState::Disconnected);
            self.inner
                .emit(LogEvent::notice("auto-reconnect disabled, connection lost"));
        }
    }

    /// All logged events.
    pub fn log_snapshot(&self) -> Vec<LogEvent> {
        lock(&self.inner.log).snapshot()
    }

    /// Logged events, either all or only those not read before.
    pub fn read_log(&self, since_last: bool) -> Vec<LogEvent> {
        let mut log = lock(&self.inner.log);
        if since_last {
            log.read_since_last()
        } else {
            log.read_all()
        }
    }

    /// Drop every logged event.
    pub fn clear_log(&self) {
        lock(&self.inner.log).clear();
    }

    /// Current log position.
    pub(crate) fn log_mark(&self) -> LogMark {
        lock(&self.inner.log).mark()
    }

    /// Logged events at or after `mark`.
    pub(crate) fn log_since(&self, mark: LogMark) -> Vec<LogEvent> {
        lock(&self.inner.log).events_since(mark)
    }
}

impl Inner {
    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!("Session {}: {} -> {}", self.id, previous, state);
        }
    }

    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    fn emit(&self, event: LogEvent) {
        lock(&self.log).push(event.clone());
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    fn reconnect_settings(&self) -> (bool, Duration) {
        let settings = lock(&self.settings);
        (settings.reconnect_enabled, settings.reconnect_interval)
    }

    /// Check the state allows connecting, cancel the timer and enter
    /// `Connecting`. Returns the state before the attempt.
    fn begin_connect(&self, core: &mut Core) -> Result<SessionState> {
        let prior = self.state();
        if !prior.can_connect() {
            return Err(Error::InvalidState {
                operation: "connect",
                state: prior,
            });
        }
        if let Some(timer) = core.timer.take() {
            timer.cancel();
        }
        self.set_state(SessionState::Connecting);
        Ok(prior)
    }

    /// Undo a connect attempt that never opened a port. A session that was
    /// waiting for its device goes back to polling for it.
    fn restore(self: &Arc<Self>, core: &mut Core, prior: SessionState) {
        if prior == SessionState::ReconnectWaiting {
            self.set_state(SessionState::ReconnectWaiting);
            self.start_reconnect_timer(core);
        } else {
            self.set_state(SessionState::Disconnected);
        }
    }

    async fn open_and_start(
        self: &Arc<Self>,
        core: &mut Core,
        prior: SessionState,
        port: Arc<dyn PortHandle>,
        config: ConnectionConfig,
    ) -> Result<()> {
        info!(
            "Session {}: opening {} ({})",
            self.id,
            port.name(),
            config.shorthand()
        );
        if let Err(e) = port.open(&config).await {
            error!("Session {}: open failed: {}", self.id, e);
            self.emit(LogEvent::error(
                ErrorKind::OpenFailed,
                format!("{}: {}", port.name(), e),
            ));
            self.restore(core, prior);
            return Err(e.into());
        }

        self.start(core, port, config).await;
        let name = lock(&self.link).port_name.clone().unwrap_or_default();
        self.emit(LogEvent::notice(format!(
            "connected to {} ({})",
            name,
            config.shorthand()
        )));
        Ok(())
    }

    /// Take ownership of an opened port and start reading from it.
    async fn start(
        self: &Arc<Self>,
        core: &mut Core,
        port: Arc<dyn PortHandle>,
        config: ConnectionConfig,
    ) {
        let generation = self.advance(core, false);

        *lock(&self.link) = Link {
            port_name: Some(port.name().to_string()),
            identity: port.identity(),
            config: Some(config),
        };
        *self.writer.lock().await = Some(Arc::clone(&port));
        core.port = Some(Arc::clone(&port));

        let (cancel, cancelled) = oneshot::channel();
        tokio::spawn(read_loop(Arc::downgrade(self), port, generation, cancelled));
        core.reader = Some(ReadLoop { cancel });

        self.set_state(SessionState::Connected);
    }

    /// Start a new generation, flushing or discarding decoder state.
    fn advance(&self, core: &mut Core, flush: bool) -> u64 {
        core.generation += 1;
        let mut stream = lock(&self.stream);
        stream.generation = core.generation;
        if flush {
            if let Some(event) = stream.decoder.flush() {
                self.emit(event);
            }
        } else {
            stream.decoder.reset();
        }
        core.generation
    }

    /// Release the port and stop every background actor.
    ///
    /// Secondary failures are ignored so this always completes.
    async fn teardown(&self, core: &mut Core) {
        if let Some(timer) = core.timer.take() {
            timer.cancel();
        }
        self.advance(core, true);
        if let Some(reader) = core.reader.take() {
            reader.cancel();
        }
        *self.writer.lock().await = None;
        if let Some(port) = core.port.take() {
            port.close().await;
        }
    }

    fn start_reconnect_timer(self: &Arc<Self>, core: &mut Core) {
        let (_, interval) = self.reconnect_settings();
        let generation = core.generation;
        let weak = Arc::downgrade(self);
        let tick: Tick = Box::new(move || {
            let weak = Weak::clone(&weak);
            Box::pin(async move {
                match weak.upgrade() {
                    Some(inner) => inner.reconnect_tick(generation).await,
                    None => ControlFlow::Break(()),
                }
            })
        });
        debug!(
            "Session {}: polling for device every {:?}",
            self.id, interval
        );
        core.timer = Some(self.scheduler.every(interval, tick));
    }

    /// Feed a chunk read under `generation` to the decoder.
    fn deliver(&self, generation: u64, chunk: &[u8]) {
        let mut stream = lock(&self.stream);
        if stream.generation != generation {
            return;
        }
        debug!("Session {}: received {} bytes", self.id, chunk.len());
        for event in stream.decoder.feed(chunk) {
            self.emit(event);
        }
    }

    /// Handle the read loop of `generation` ending on its own.
    async fn on_read_end(self: &Arc<Self>, generation: u64, end: ReadEnd) {
        let mut core = self.core.lock().await;
        if core.generation != generation {
            return;
        }
        core.reader = None;

        let (reconnect_enabled, _) = self.reconnect_settings();
        let identity = lock(&self.link).identity;
        let wait_for_device =
            matches!(end, ReadEnd::Removed) && reconnect_enabled && identity.is_some();

        self.set_state(SessionState::Disconnecting);
        self.advance(&mut core, true);

        match &end {
            ReadEnd::Eof => info!("Session {}: end of stream", self.id),
            ReadEnd::Removed if wait_for_device => {
                warn!("Session {}: device removed, waiting for it", self.id);
                self.emit(
                    LogEvent::notice("device removed, waiting for it to return")
                        .with_fault(ErrorKind::DeviceRemoved),
                );
            }
            ReadEnd::Removed => {
                warn!("Session {}: device removed", self.id);
                self.emit(
                    LogEvent::notice("device removed").with_fault(ErrorKind::DeviceRemoved),
                );
            }
            ReadEnd::Cancelled => {
                error!("Session {}: read cancelled by the port", self.id);
                self.emit(LogEvent::error(ErrorKind::ReadFailed, "read cancelled"));
            }
            ReadEnd::Failed(detail) => {
                error!("Session {}: read failed: {}", self.id, detail);
                self.emit(LogEvent::error(ErrorKind::ReadFailed, detail.clone()));
            }
        }

        *self.writer.lock().await = None;
        if let Some(port) = core.port.take() {
            port.close().await;
        }

        if wait_for_device {
            self.set_state(SessionState::ReconnectWaiting);
            self.start_reconnect_timer(&mut core);
        } else {
            self.set_state(SessionState::Disconnected);
            self.emit(LogEvent::notice("connection lost"));
        }
    }

    /// One reconnect attempt.
    async fn reconnect_tick(self: &Arc<Self>, generation: u64) -> ControlFlow<()> {
        let mut core = self.core.lock().await;
        if core.generation != generation || self.state() != SessionState::ReconnectWaiting {
            return ControlFlow::Break(());
        }
        let Link {
            identity, config, ..
        } = lock(&self.link).clone();
        let (Some(identity), Some(config)) = (identity, config) else {
            return ControlFlow::Break(());
        };

        let Some(port) = self.policy.probe(identity).await else {
            return ControlFlow::Continue(());
        };

        self.set_state(SessionState::Connecting);
        if let Err(e) = port.open(&config).await {
            // Retried on the next tick; not worth a log event each time.
            warn!(
                "Session {}: reopening {} failed: {}",
                self.id,
                port.name(),
                e
            );
            self.set_state(SessionState::ReconnectWaiting);
            return ControlFlow::Continue(());
        }

        // This tick is running inside the timer task, so the task stops by
        // returning Break rather than by being cancelled.
        drop(core.timer.take());
        let name = port.name().to_string();
        self.start(&mut core, port, config).await;
        info!("Session {}: reconnected to {}", self.id, name);
        self.emit(LogEvent::notice(format!("reconnected to {name}")));
        ControlFlow::Break(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if let Some(timer) = core.timer.take() {
            timer.cancel();
        }
        if let Some(reader) = core.reader.take() {
            reader.cancel();
        }
    }
}

async fn read_loop(
    inner: Weak<Inner>,
    port: Arc<dyn PortHandle>,
    generation: u64,
    mut cancelled: oneshot::Receiver<()>,
) {
    let end = loop {
        let result = tokio::select! {
            biased;
            _ = &mut cancelled => return,
            result = port.read_chunk() => result,
        };
        let Some(session) = inner.upgrade() else {
            return;
        };
        match result {
            Ok(Some(chunk)) => session.deliver(generation, &chunk),
            Ok(None) => break ReadEnd::Eof,
            // After a deliberate close the generation has already moved on
            // and on_read_end ignores this.
            Err(ReadError::Cancelled) => break ReadEnd::Cancelled,
            Err(ReadError::DeviceRemoved) => break ReadEnd::Removed,
            Err(ReadError::Other(detail)) => break ReadEnd::Failed(detail),
        }
    };

    if let Some(session) = inner.upgrade() {
        session.on_read_end(generation, end).await;
    }
}
