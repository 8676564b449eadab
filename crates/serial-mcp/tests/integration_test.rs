//! Integration tests for the serial-mcp system.
//!
//! These drive the whole stack below the MCP transport: configuration,
//! session manager, controller, decoder and a simulated device.

use std::sync::Arc;
use std::time::Duration;

use serial_mcp::{log_entries, LineSettings, PortSelection, SerialMcpServer};
use serial_mcp_core::{DeviceIdentity, LogKind, ServerConfig, SessionState};
use serial_mcp_port::{SimulatedBus, SimulatedPort};
use serial_mcp_session::{ExportFormat, LogExporter, WaitCondition};

const CONFIG: &str = r#"
server:
  max_sessions: 4
serial:
  baud_rate: 9600
  newline: crlf
  line_terminator: crlf
reconnect:
  enabled: true
  interval_ms: 500
"#;

#[tokio::test(start_paused = true)]
async fn test_configured_session_survives_unplug() {
    let config = ServerConfig::from_yaml(CONFIG).unwrap();
    let identity = DeviceIdentity::new(0x0403, 0x6001);

    let bus = SimulatedBus::new();
    let port = SimulatedPort::new("/dev/ttyUSB0", Some(identity));
    bus.authorize(Arc::clone(&port));

    let server = SerialMcpServer::from_config(&config, bus.clone());
    let manager = server.manager();

    let selection = PortSelection {
        vendor_id: Some(0x0403),
        product_id: Some(0x6001),
        ..Default::default()
    };
    let line = LineSettings {
        parity: Some(serial_mcp_core::Parity::Even),
        ..Default::default()
    };
    let line_config = line
        .resolve(config.serial.connection_config())
        .unwrap();

    let session = manager.create_session(None).unwrap();
    session
        .connect(line_config, selection.to_request().unwrap())
        .await
        .unwrap();
    assert_eq!(port.last_config().unwrap().shorthand(), "9600 8E1");

    // Configured terminator and newline policy apply
    session.send("AT").await.unwrap();
    assert_eq!(port.take_written(), b"AT\r\n");
    port.inject(b"OK\r\nlone\rcr\r\n");
    let result = session
        .wait_for(&WaitCondition::for_text("^lone\rcr$").with_timeout(Duration::from_secs(1)))
        .await
        .unwrap();
    assert!(result.condition_met);

    // Unplug and plug back in
    port.unplug();
    let waiting = session
        .wait_for(
            &WaitCondition::for_state(SessionState::ReconnectWaiting)
                .with_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap();
    assert!(waiting.condition_met);

    port.plug_in();
    let back = session
        .wait_for(
            &WaitCondition::for_state(SessionState::Connected).with_timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert!(back.condition_met);
    assert_eq!(port.open_count(), 2);
    assert_eq!(port.last_config().unwrap().shorthand(), "9600 8E1");

    let entries = log_entries(&session.log_snapshot(), None);
    let notices: Vec<&str> = entries
        .iter()
        .filter(|e| e.kind == "notice")
        .map(|e| e.text.as_str())
        .collect();
    assert_eq!(notices.len(), 3);
    assert!(notices[1].contains("waiting"));
    assert!(notices[2].starts_with("reconnected to /dev/ttyUSB0"));

    server.shutdown().await;
    assert_eq!(manager.session_count(), 0);
    assert!(!port.is_open());
}

#[tokio::test]
async fn test_session_limit_from_config() {
    let config = ServerConfig::from_yaml(CONFIG).unwrap();
    let server = SerialMcpServer::from_config(&config, SimulatedBus::new());

    for _ in 0..4 {
        server.manager().create_session(None).unwrap();
    }
    assert!(server.manager().create_session(None).is_err());
}

#[tokio::test]
async fn test_exported_log_loads_back() {
    let bus = SimulatedBus::new();
    let port = SimulatedPort::new("sim0", None);
    bus.authorize(Arc::clone(&port));
    let server = SerialMcpServer::from_config(&ServerConfig::default(), bus.clone());

    let session = server.manager().create_session(None).unwrap();
    session
        .connect(
            ServerConfig::default().serial.connection_config(),
            PortSelection::default().to_request().unwrap(),
        )
        .await
        .unwrap();
    session.send("status").await.unwrap();

    let exporter = LogExporter::new(ExportFormat::JsonLines);
    let rendered = exporter.render(&session.log_snapshot()).unwrap();
    let loaded = LogExporter::parse_json_lines(&rendered).unwrap();

    assert_eq!(loaded, session.log_snapshot());
    assert_eq!(loaded.last().unwrap().kind, LogKind::Sent);
}
