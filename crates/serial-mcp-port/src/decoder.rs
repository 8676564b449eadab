//! Incremental decoding of received bytes into display lines.
//!
//! A [`StreamDecoder`] turns a sequence of arbitrary byte chunks into
//! completed-line [`LogEvent`]s plus one pending partial line. Chunk
//! boundaries never change what is emitted: a multi-byte character or a
//! `\r\n` pair split across two reads decodes exactly as if it had arrived
//! in one piece.

use chrono::{DateTime, Utc};

use serial_mcp_core::{DisplayFormat, LogEvent, NewlinePolicy};

/// Incremental UTF-8 decoding that carries an incomplete trailing sequence
/// over to the next chunk.
#[derive(Debug, Default)]
struct Utf8Stream {
    carry: Vec<u8>,
}

impl Utf8Stream {
    fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more bytes.
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Give up on any carried bytes.
    fn finish(&mut self) -> Option<char> {
        if self.carry.is_empty() {
            None
        } else {
            self.carry.clear();
            Some(char::REPLACEMENT_CHARACTER)
        }
    }

    fn reset(&mut self) {
        self.carry.clear();
    }
}

/// A line with nothing but separators in it is not worth displaying.
fn is_blank(line: &str) -> bool {
    line.trim_matches(|c| c == '\r' || c == '\n').is_empty()
}

/// Turns raw byte chunks into received-data log events.
///
/// In [`DisplayFormat::Binary`] each chunk becomes one event immediately. In
/// [`DisplayFormat::Text`] bytes are decoded as UTF-8 and split into lines
/// according to the [`NewlinePolicy`]; the trailing unterminated text is kept
/// as the pending partial line, previewed with `is_partial` events, and
/// emitted for good by [`flush`](Self::flush).
///
/// Completed lines carry the time their first character arrived.
#[derive(Debug)]
pub struct StreamDecoder {
    format: DisplayFormat,
    policy: NewlinePolicy,
    utf8: Utf8Stream,
    pending: String,
    pending_since: Option<DateTime<Utc>>,
    /// `CrLf`: a `\r` arrived and the next character decides what it is.
    held_cr: bool,
    /// `Any`: a `\r` ended a line, so one directly following `\n` belongs to it.
    skip_lf: bool,
    /// Pending text changed during the current `feed`.
    dirty: bool,
}

impl StreamDecoder {
    /// Create a decoder.
    pub fn new(format: DisplayFormat, policy: NewlinePolicy) -> Self {
        Self {
            format,
            policy,
            utf8: Utf8Stream::default(),
            pending: String::new(),
            pending_since: None,
            held_cr: false,
            skip_lf: false,
            dirty: false,
        }
    }

    /// Current display format.
    pub fn format(&self) -> DisplayFormat {
        self.format
    }

    /// Current newline policy.
    pub fn policy(&self) -> NewlinePolicy {
        self.policy
    }

    /// The partial line received so far.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Process one chunk of received bytes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<LogEvent> {
        if chunk.is_empty() {
            return Vec::new();
        }

        match self.format {
            DisplayFormat::Binary => vec![LogEvent::received_bytes(chunk.to_vec())],
            DisplayFormat::Text => {
                let text = self.utf8.decode(chunk);
                let mut events = Vec::new();
                self.dirty = false;
                for c in text.chars() {
                    self.push_char(c, &mut events);
                }
                if self.dirty && !is_blank(&self.pending) {
                    let since = self.pending_since.unwrap_or_else(Utc::now);
                    events.push(LogEvent::received_partial(self.pending.clone(), since));
                }
                events
            }
        }
    }

    /// Emit whatever is pending as a final line and clear all state.
    ///
    /// Returns `None` when nothing displayable is pending, so a second call
    /// in a row always returns `None`.
    pub fn flush(&mut self) -> Option<LogEvent> {
        let mut scratch = Vec::new();
        if let Some(c) = self.utf8.finish() {
            self.push_char(c, &mut scratch);
        }
        if std::mem::take(&mut self.held_cr) {
            self.append('\r');
        }
        self.skip_lf = false;
        self.dirty = false;

        let line = std::mem::take(&mut self.pending);
        let since = self.pending_since.take();
        if is_blank(&line) {
            None
        } else {
            Some(LogEvent::received_line(
                line,
                since.unwrap_or_else(Utc::now),
            ))
        }
    }

    /// Drop all buffered state without emitting anything.
    pub fn reset(&mut self) {
        self.utf8.reset();
        self.pending.clear();
        self.pending_since = None;
        self.held_cr = false;
        self.skip_lf = false;
        self.dirty = false;
    }

    /// Switch display format for bytes arriving from now on.
    ///
    /// Leaving text mode flushes the pending line so it is not stranded;
    /// entering text mode starts from a clean state.
    pub fn set_format(&mut self, format: DisplayFormat) -> Option<LogEvent> {
        if format == self.format {
            return None;
        }
        let flushed = match format {
            DisplayFormat::Binary => self.flush(),
            DisplayFormat::Text => {
                self.reset();
                None
            }
        };
        self.format = format;
        flushed
    }

    /// Switch the newline policy for characters decoded from now on.
    pub fn set_policy(&mut self, policy: NewlinePolicy) {
        self.policy = policy;
    }

    fn push_char(&mut self, c: char, events: &mut Vec<LogEvent>) {
        if std::mem::take(&mut self.held_cr) {
            if c == '\n' {
                self.complete_line(events);
                return;
            }
            self.append('\r');
        }
        if std::mem::take(&mut self.skip_lf) && c == '\n' {
            return;
        }

        match (self.policy, c) {
            (NewlinePolicy::Lf, '\n') | (NewlinePolicy::Cr, '\r') | (NewlinePolicy::Any, '\n') => {
                self.complete_line(events)
            }
            (NewlinePolicy::Any, '\r') => {
                self.complete_line(events);
                self.skip_lf = true;
            }
            (NewlinePolicy::CrLf, '\r') => self.held_cr = true,
            _ => self.append(c),
        }
    }

    fn append(&mut self, c: char) {
        if self.pending.is_empty() {
            self.pending_since.get_or_insert_with(Utc::now);
        }
        self.pending.push(c);
        self.dirty = true;
    }

    fn complete_line(&mut self, events: &mut Vec<LogEvent>) {
        let line = std::mem::take(&mut self.pending);
        let since = self.pending_since.take();
        if !is_blank(&line) {
            events.push(LogEvent::received_line(
                line,
                since.unwrap_or_else(Utc::now),
            ));
        }
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new(DisplayFormat::Text, NewlinePolicy::Any)
    }
}
