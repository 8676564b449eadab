//! Log events emitted by a session.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ErrorKind;

/// What a log event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Text written to the device
    Sent,
    /// Data read from the device
    Received,
    /// A failed operation
    Error,
    /// A lifecycle notice (connected, lost, reconnected)
    Notice,
}

/// Event content: decoded text or raw bytes, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Payload {
    /// Decoded text
    Text(String),
    /// Raw bytes (binary display mode)
    Bytes(Vec<u8>),
}

impl Payload {
    /// Display form: text as-is, bytes as an uppercase hex dump.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text),
            Self::Bytes(bytes) => Cow::Owned(format_hex(bytes)),
        }
    }

    /// Whether the payload carries nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Bytes(bytes) => bytes.is_empty(),
        }
    }
}

/// One unit of displayable session activity.
///
/// Events are immutable once emitted. The only exception is a partial
/// received line, which a later event for the same line supersedes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Event kind
    pub kind: LogKind,
    /// Capture time
    pub timestamp: DateTime<Utc>,
    /// Event content
    pub payload: Payload,
    /// True only for the still-open trailing line of a received stream
    #[serde(default)]
    pub is_partial: bool,
    /// Failure classification for error events and device-removed notices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<ErrorKind>,
}

impl LogEvent {
    /// A sent-text event stamped now.
    pub fn sent(text: impl Into<String>) -> Self {
        Self::new(LogKind::Sent, Payload::Text(text.into()), Utc::now())
    }

    /// A completed received line.
    pub fn received_line(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(LogKind::Received, Payload::Text(text.into()), timestamp)
    }

    /// A preview of the line still being received.
    pub fn received_partial(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            is_partial: true,
            ..Self::received_line(text, timestamp)
        }
    }

    /// A received chunk in binary display mode.
    pub fn received_bytes(bytes: Vec<u8>) -> Self {
        Self::new(LogKind::Received, Payload::Bytes(bytes), Utc::now())
    }

    /// An error event.
    pub fn error(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            fault: Some(kind),
            ..Self::new(LogKind::Error, Payload::Text(detail.into()), Utc::now())
        }
    }

    /// A lifecycle notice.
    pub fn notice(text: impl Into<String>) -> Self {
        Self::new(LogKind::Notice, Payload::Text(text.into()), Utc::now())
    }

    /// Attach a failure classification.
    pub fn with_fault(mut self, kind: ErrorKind) -> Self {
        self.fault = Some(kind);
        self
    }

    fn new(kind: LogKind, payload: Payload, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            timestamp,
            payload,
            is_partial: false,
            fault: None,
        }
    }

    /// Display text of the payload.
    pub fn text(&self) -> Cow<'_, str> {
        self.payload.as_text()
    }

    /// Whether this is a received-data event.
    pub fn is_received(&self) -> bool {
        self.kind == LogKind::Received
    }
}

/// Format bytes as space-separated two-digit uppercase hex.
///
/// ```
/// assert_eq!(serial_mcp_core::format_hex(&[0x0A, 0xFF, 0x01]), "0A FF 01");
/// ```
pub fn format_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02X}"));
    }
    out
}
