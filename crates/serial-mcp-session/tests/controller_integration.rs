//! Integration tests for the session lifecycle against simulated devices.
//!
//! Timer-driven tests run on paused tokio time, so reconnect intervals pass
//! instantly.

use std::sync::Arc;
use std::time::Duration;

use serial_mcp_core::{
    ConnectionConfig, DeviceIdentity, Error, ErrorKind, LogEvent, LogKind, SessionState,
};
use serial_mcp_port::{PortRequest, SimulatedBus, SimulatedPort};
use serial_mcp_session::{SessionController, SessionOptions};

const ARDUINO: DeviceIdentity = DeviceIdentity {
    vendor_id: 0x2341,
    product_id: 0x0043,
};

const INTERVAL: Duration = Duration::from_secs(2);

struct Harness {
    bus: Arc<SimulatedBus>,
    port: Arc<SimulatedPort>,
    session: SessionController,
}

impl Harness {
    fn new(identity: Option<DeviceIdentity>, reconnect_enabled: bool) -> Self {
        let bus = SimulatedBus::new();
        let port = SimulatedPort::new("/dev/ttyACM0", identity);
        bus.add_port(Arc::clone(&port));
        let options = SessionOptions {
            reconnect_enabled,
            reconnect_interval: INTERVAL,
            ..SessionOptions::default()
        };
        let session = SessionController::new(bus.clone(), options);
        Self { bus, port, session }
    }

    async fn connected(identity: Option<DeviceIdentity>, reconnect_enabled: bool) -> Self {
        let harness = Self::new(identity, reconnect_enabled);
        harness
            .session
            .connect(ConnectionConfig::new(9600), PortRequest::any())
            .await
            .expect("connect");
        harness
    }

    async fn reach(&self, state: SessionState) {
        let mut states = self.session.subscribe_state();
        tokio::time::timeout(Duration::from_secs(1), states.wait_for(|s| *s == state))
            .await
            .unwrap_or_else(|_| panic!("session never reached {state}"))
            .expect("state channel closed");
    }

    fn events_of(&self, kind: LogKind) -> Vec<LogEvent> {
        self.session
            .log_snapshot()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }

    fn texts_of(&self, kind: LogKind) -> Vec<String> {
        self.events_of(kind)
            .iter()
            .map(|e| e.text().into_owned())
            .collect()
    }
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn removal_with_reconnect_waits_for_device() {
    let h = Harness::connected(Some(ARDUINO), true).await;

    h.port.unplug();
    h.reach(SessionState::ReconnectWaiting).await;

    assert!(!h.port.is_open());
    assert!(!h
        .texts_of(LogKind::Notice)
        .contains(&"connection lost".to_string()));
    let notice = h.events_of(LogKind::Notice).pop().unwrap();
    assert_eq!(notice.fault, Some(ErrorKind::DeviceRemoved));
    assert_eq!(h.session.identity(), Some(ARDUINO));
}

#[tokio::test(start_paused = true)]
async fn removal_without_reconnect_disconnects() {
    let h = Harness::connected(Some(ARDUINO), false).await;

    h.port.unplug();
    h.reach(SessionState::Disconnected).await;

    // Removal is reported as a notice, never as an error.
    assert!(h.events_of(LogKind::Error).is_empty());
    let notices = h.events_of(LogKind::Notice);
    let removed = &notices[notices.len() - 2];
    assert_eq!(removed.text(), "device removed");
    assert_eq!(removed.fault, Some(ErrorKind::DeviceRemoved));
    assert_eq!(notices.last().unwrap().text(), "connection lost");

    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(h.bus.list_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn removal_without_identity_disconnects() {
    let h = Harness::connected(None, true).await;

    h.port.unplug();
    h.reach(SessionState::Disconnected).await;

    tokio::time::sleep(INTERVAL * 3).await;
    assert_eq!(h.bus.list_calls(), 0);
    assert_eq!(h.session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn device_returning_is_reconnected() {
    let h = Harness::connected(Some(ARDUINO), true).await;
    h.port.unplug();
    h.reach(SessionState::ReconnectWaiting).await;

    // Still gone at the first probe.
    tokio::time::sleep(INTERVAL + Duration::from_millis(100)).await;
    assert_eq!(h.bus.list_calls(), 1);
    assert_eq!(h.session.state(), SessionState::ReconnectWaiting);

    h.port.plug_in();
    tokio::time::sleep(INTERVAL).await;
    h.reach(SessionState::Connected).await;

    assert_eq!(h.port.open_count(), 2);
    assert_eq!(h.port.last_config(), Some(ConnectionConfig::new(9600)));
    assert_eq!(
        h.texts_of(LogKind::Notice).last().unwrap(),
        "reconnected to /dev/ttyACM0"
    );

    // The reconnected session reads again and the timer is gone.
    h.port.inject(b"back\n");
    settle().await;
    assert!(h
        .texts_of(LogKind::Received)
        .contains(&"back".to_string()));

    let probes = h.bus.list_calls();
    tokio::time::sleep(INTERVAL * 3).await;
    assert_eq!(h.bus.list_calls(), probes);
}

#[tokio::test(start_paused = true)]
async fn device_returning_under_new_name_is_found_by_identity() {
    let h = Harness::connected(Some(ARDUINO), true).await;
    h.port.unplug();
    h.reach(SessionState::ReconnectWaiting).await;

    let renamed = SimulatedPort::new("/dev/ttyACM1", Some(ARDUINO));
    h.bus.authorize(Arc::clone(&renamed));
    // Another device that must not be picked.
    h.bus
        .authorize(SimulatedPort::new("/dev/ttyUSB0", Some(DeviceIdentity::new(0x0403, 0x6001))));

    tokio::time::sleep(INTERVAL + Duration::from_millis(100)).await;
    h.reach(SessionState::Connected).await;
    assert!(renamed.is_open());
    assert_eq!(h.session.port_name().as_deref(), Some("/dev/ttyACM1"));
}

#[tokio::test(start_paused = true)]
async fn reopen_failure_keeps_waiting() {
    let h = Harness::connected(Some(ARDUINO), true).await;
    h.port.unplug();
    h.reach(SessionState::ReconnectWaiting).await;
    let errors_before = h.events_of(LogKind::Error).len();

    h.port.plug_in();
    h.port.fail_opens(Some("device busy"));
    tokio::time::sleep(INTERVAL * 2 + Duration::from_millis(100)).await;
    assert_eq!(h.session.state(), SessionState::ReconnectWaiting);
    assert_eq!(h.bus.list_calls(), 2);
    // Failed reopen attempts are not logged as events.
    assert_eq!(h.events_of(LogKind::Error).len(), errors_before);

    h.port.fail_opens(None);
    tokio::time::sleep(INTERVAL).await;
    h.reach(SessionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_waiting_stops_probing() {
    let h = Harness::connected(Some(ARDUINO), true).await;
    h.port.unplug();
    h.reach(SessionState::ReconnectWaiting).await;

    tokio::time::sleep(INTERVAL + Duration::from_millis(100)).await;
    assert_eq!(h.bus.list_calls(), 1);

    h.session.disconnect().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Disconnected);

    h.port.plug_in();
    tokio::time::sleep(INTERVAL * 10).await;
    assert_eq!(h.bus.list_calls(), 1);
    assert_eq!(h.session.state(), SessionState::Disconnected);
    assert_eq!(h.port.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_connect_while_waiting_cancels_timer() {
    let h = Harness::connected(Some(ARDUINO), true).await;
    h.port.unplug();
    h.reach(SessionState::ReconnectWaiting).await;

    let other = SimulatedPort::new("/dev/ttyUSB0", Some(DeviceIdentity::new(0x0403, 0x6001)));
    h.bus.add_port(Arc::clone(&other));
    h.session
        .connect(ConnectionConfig::new(115_200), PortRequest::named("/dev/ttyUSB0"))
        .await
        .unwrap();

    assert_eq!(h.session.state(), SessionState::Connected);
    assert_eq!(h.session.identity(), Some(DeviceIdentity::new(0x0403, 0x6001)));

    h.port.plug_in();
    tokio::time::sleep(INTERVAL * 3).await;
    assert_eq!(h.bus.list_calls(), 0);
    assert_eq!(h.port.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_pick_while_waiting_keeps_waiting() {
    let h = Harness::connected(Some(ARDUINO), true).await;
    h.port.unplug();
    h.reach(SessionState::ReconnectWaiting).await;

    h.bus.cancel_requests(true);
    let result = h
        .session
        .connect(ConnectionConfig::default(), PortRequest::any())
        .await;
    assert!(matches!(result, Err(Error::UserCancelled)));
    assert_eq!(h.session.state(), SessionState::ReconnectWaiting);

    h.port.plug_in();
    tokio::time::sleep(INTERVAL + Duration::from_millis(100)).await;
    h.reach(SessionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn open_failure_while_waiting_keeps_waiting() {
    let h = Harness::connected(Some(ARDUINO), true).await;
    h.port.unplug();
    h.reach(SessionState::ReconnectWaiting).await;

    let busy = SimulatedPort::new("/dev/ttyUSB0", Some(DeviceIdentity::new(0x0403, 0x6001)));
    busy.fail_opens(Some("busy"));
    h.bus.add_port(Arc::clone(&busy));
    let result = h
        .session
        .connect(ConnectionConfig::new(115_200), PortRequest::named("/dev/ttyUSB0"))
        .await;
    assert!(matches!(result, Err(Error::OpenFailed(_))));
    assert_eq!(h.session.state(), SessionState::ReconnectWaiting);
    assert_eq!(
        h.events_of(LogKind::Error).pop().unwrap().fault,
        Some(ErrorKind::OpenFailed)
    );
    assert_eq!(h.session.identity(), Some(ARDUINO));

    // The known device is still polled for and picked up with its old settings.
    h.port.plug_in();
    tokio::time::sleep(INTERVAL + Duration::from_millis(100)).await;
    h.reach(SessionState::Connected).await;
    assert_eq!(h.port.open_count(), 2);
    assert_eq!(h.port.last_config(), Some(ConnectionConfig::new(9600)));
    assert!(!busy.is_open());
}

#[tokio::test(start_paused = true)]
async fn open_failure_from_disconnected_stays_disconnected() {
    let h = Harness::new(Some(ARDUINO), true);
    h.port.fail_opens(Some("permission denied"));

    let result = h
        .session
        .connect(ConnectionConfig::new(9600), PortRequest::any())
        .await;
    assert!(matches!(result, Err(Error::OpenFailed(_))));
    assert_eq!(h.session.state(), SessionState::Disconnected);

    tokio::time::sleep(INTERVAL * 3).await;
    assert_eq!(h.bus.list_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn disabling_reconnect_while_waiting_disconnects() {
    let h = Harness::connected(Some(ARDUINO), true).await;
    h.port.unplug();
    h.reach(SessionState::ReconnectWaiting).await;

    h.session.set_reconnect_enabled(false).await;
    assert_eq!(h.session.state(), SessionState::Disconnected);

    tokio::time::sleep(INTERVAL * 3).await;
    assert_eq!(h.bus.list_calls(), 0);
}

#[tokio::test]
async fn end_of_stream_disconnects() {
    let h = Harness::connected(Some(ARDUINO), true).await;

    h.port.inject(b"last words");
    h.port.inject_eof();
    h.reach(SessionState::Disconnected).await;

    let received = h.events_of(LogKind::Received);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].text(), "last words");
    assert!(!received[0].is_partial);
    assert_eq!(h.texts_of(LogKind::Notice).last().unwrap(), "connection lost");
    assert!(!h.port.is_open());
}

#[tokio::test]
async fn read_error_disconnects() {
    let h = Harness::connected(Some(ARDUINO), true).await;

    h.port.inject_read_error("framing error");
    h.reach(SessionState::Disconnected).await;

    let errors = h.events_of(LogKind::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].fault, Some(ErrorKind::ReadFailed));
    assert_eq!(errors[0].text(), "framing error");
}

#[tokio::test]
async fn unrequested_read_cancel_disconnects() {
    let h = Harness::connected(Some(ARDUINO), true).await;

    h.port.inject_cancelled();
    h.reach(SessionState::Disconnected).await;

    let errors = h.events_of(LogKind::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].fault, Some(ErrorKind::ReadFailed));
    assert_eq!(errors[0].text(), "read cancelled");
    assert_eq!(h.texts_of(LogKind::Notice).last().unwrap(), "connection lost");
    assert!(!h.port.is_open());
    assert!(matches!(h.session.send("ping").await, Err(Error::NotConnected)));
}

#[tokio::test]
async fn removal_flushes_partial_line() {
    let h = Harness::connected(Some(ARDUINO), true).await;

    h.port.inject(b"temp=21");
    settle().await;
    h.port.unplug();
    h.reach(SessionState::ReconnectWaiting).await;

    let received = h.events_of(LogKind::Received);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].text(), "temp=21");
    assert!(!received[0].is_partial);
}

#[tokio::test(start_paused = true)]
async fn deliberate_disconnect_is_not_removal() {
    let h = Harness::connected(Some(ARDUINO), true).await;

    h.session.disconnect().await.unwrap();
    settle().await;
    tokio::time::sleep(INTERVAL * 3).await;

    assert_eq!(h.session.state(), SessionState::Disconnected);
    assert_eq!(h.bus.list_calls(), 0);
    assert!(h
        .session
        .log_snapshot()
        .iter()
        .all(|e| e.fault != Some(ErrorKind::DeviceRemoved)));
    // The read cancelled by the close is not reported either.
    assert!(h.events_of(LogKind::Error).is_empty());
    assert_eq!(
        h.texts_of(LogKind::Notice).last().unwrap(),
        "disconnected from /dev/ttyACM0"
    );
}

#[tokio::test]
async fn empty_send_is_noop() {
    let h = Harness::connected(Some(ARDUINO), true).await;
    let logged = h.session.log_snapshot().len();

    h.session.send("").await.unwrap();
    assert!(h.port.written().is_empty());
    assert_eq!(h.session.log_snapshot().len(), logged);
}

#[tokio::test]
async fn write_failure_stays_connected() {
    let h = Harness::connected(Some(ARDUINO), true).await;

    h.port.fail_writes(Some("buffer overrun"));
    let result = h.session.send("AT").await;
    assert!(matches!(result, Err(Error::WriteFailed(_))));
    assert_eq!(h.session.state(), SessionState::Connected);

    let errors = h.events_of(LogKind::Error);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].fault, Some(ErrorKind::WriteFailed));
    assert!(h.events_of(LogKind::Sent).is_empty());

    h.port.fail_writes(None);
    h.session.send("AT").await.unwrap();
    assert_eq!(h.texts_of(LogKind::Sent), vec!["AT"]);
}

#[tokio::test]
async fn multibyte_split_across_reads() {
    let h = Harness::connected(None, false).await;
    let bytes = "25℃\n".as_bytes();

    h.port.inject(&bytes[..3]);
    h.port.inject(&bytes[3..4]);
    h.port.inject(&bytes[4..]);
    settle().await;

    let lines: Vec<_> = h
        .events_of(LogKind::Received)
        .into_iter()
        .filter(|e| !e.is_partial)
        .map(|e| e.text().into_owned())
        .collect();
    assert_eq!(lines, vec!["25℃"]);
}

#[tokio::test]
async fn read_log_since_last() {
    let h = Harness::connected(None, false).await;
    h.session.read_log(true);

    h.port.inject(b"one\ntw");
    settle().await;
    let first: Vec<_> = h
        .session
        .read_log(true)
        .iter()
        .map(|e| e.text().into_owned())
        .collect();
    assert_eq!(first, vec!["one", "tw"]);

    h.port.inject(b"o\n");
    settle().await;
    let second = h.session.read_log(true);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].text(), "two");

    h.session.clear_log();
    assert!(h.session.log_snapshot().is_empty());
}
