//! Saving a session log for later reading.
//!
//! Two formats are supported: a human-readable transcript with one line per
//! event, and JSON lines (one serialized [`LogEvent`] per line) that can be
//! loaded back with [`LogExporter::parse_json_lines`].

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serial_mcp_core::{Error, LogEvent, LogKind, Result};

/// File name used when the caller does not pick one.
pub const DEFAULT_FILE_NAME: &str = "serial-log.txt";

/// Output format of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// `[timestamp] >> text` transcript
    #[default]
    Text,
    /// One JSON object per event
    JsonLines,
}

/// Renders log events to text or JSON lines.
///
/// # Example
///
/// ```
/// use serial_mcp_core::LogEvent;
/// use serial_mcp_session::{ExportFormat, LogExporter};
///
/// let events = vec![LogEvent::sent("AT"), LogEvent::notice("connected")];
/// let text = LogExporter::new(ExportFormat::Text).render(&events).unwrap();
/// assert!(text.lines().next().unwrap().ends_with(">> AT"));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct LogExporter {
    format: ExportFormat,
}

impl LogExporter {
    /// Create an exporter for `format`.
    pub fn new(format: ExportFormat) -> Self {
        Self { format }
    }

    /// Write `events` to `writer`.
    pub fn write_to<W: Write>(&self, events: &[LogEvent], writer: &mut W) -> Result<()> {
        for event in events {
            match self.format {
                ExportFormat::Text => writeln!(writer, "{}", transcript_line(event))?,
                ExportFormat::JsonLines => {
                    serde_json::to_writer(&mut *writer, event)?;
                    writeln!(writer)?;
                }
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Render `events` to a string.
    pub fn render(&self, events: &[LogEvent]) -> Result<String> {
        let mut buffer = Vec::new();
        self.write_to(events, &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e).into())
    }

    /// Save `events` to the file at `path`, replacing it.
    pub fn save_to_file<P: AsRef<Path>>(&self, events: &[LogEvent], path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(events, &mut writer)
    }

    /// Load events written in [`ExportFormat::JsonLines`].
    pub fn parse_json_lines(content: &str) -> Result<Vec<LogEvent>> {
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Error::from))
            .collect()
    }
}

fn transcript_line(event: &LogEvent) -> String {
    let marker = match event.kind {
        LogKind::Sent => ">>",
        LogKind::Received => "<<",
        LogKind::Error => "!!",
        LogKind::Notice => "--",
    };
    format!(
        "[{}] {} {}",
        event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        marker,
        event.text()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serial_mcp_core::ErrorKind;

    fn sample() -> Vec<LogEvent> {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        vec![
            LogEvent {
                timestamp: at,
                ..LogEvent::sent("AT")
            },
            LogEvent::received_line("OK", at),
            LogEvent {
                timestamp: at,
                ..LogEvent::received_bytes(vec![0x0A, 0xFF])
            },
            LogEvent {
                timestamp: at,
                ..LogEvent::error(ErrorKind::WriteFailed, "buffer overrun")
            },
            LogEvent {
                timestamp: at,
                ..LogEvent::notice("connection lost")
            },
        ]
    }

    #[test]
    fn test_text_transcript() {
        let text = LogExporter::new(ExportFormat::Text)
            .render(&sample())
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "[2024-03-01 12:30:05.000] >> AT");
        assert_eq!(lines[1], "[2024-03-01 12:30:05.000] << OK");
        assert_eq!(lines[2], "[2024-03-01 12:30:05.000] << 0A FF");
        assert_eq!(lines[3], "[2024-03-01 12:30:05.000] !! buffer overrun");
        assert_eq!(lines[4], "[2024-03-01 12:30:05.000] -- connection lost");
    }

    #[test]
    fn test_json_lines_load_back() {
        let events = sample();
        let exporter = LogExporter::new(ExportFormat::JsonLines);
        let rendered = exporter.render(&events).unwrap();
        assert_eq!(rendered.lines().count(), events.len());

        let loaded = LogExporter::parse_json_lines(&rendered).unwrap();
        assert_eq!(loaded, events);
    }

    #[test]
    fn test_parse_json_lines_rejects_garbage() {
        assert!(LogExporter::parse_json_lines("{not json}\n").is_err());
    }

    #[test]
    fn test_save_to_file() {
        let path = std::env::temp_dir().join(format!("serial-log-{}.txt", std::process::id()));
        LogExporter::default().save_to_file(&sample(), &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 5);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_empty_log() {
        let text = LogExporter::default().render(&[]).unwrap();
        assert!(text.is_empty());
    }
}
