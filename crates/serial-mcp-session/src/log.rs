//! Session log accumulation and reading.

use std::collections::VecDeque;

use serial_mcp_core::{LogEvent, LogKind};

/// Position in a [`LogBuffer`], used to look at events added after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogMark(u64);

#[derive(Debug)]
struct Entry {
    seq: u64,
    event: LogEvent,
}

/// Accumulated log of a session.
///
/// Partial received lines are kept at a fixed index and replaced in place
/// by the next received event, so the log shows each logical line once.
#[derive(Debug)]
pub struct LogBuffer {
    entries: VecDeque<Entry>,
    /// Index of the still-open partial line, if any
    open_partial: Option<usize>,
    /// Index of the first unread entry
    cursor: usize,
    next_seq: u64,
    /// Maximum number of entries kept (0 = unbounded)
    capacity: usize,
}

impl LogBuffer {
    /// Create an unbounded log.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a log keeping at most `capacity` events (0 = unbounded).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            open_partial: None,
            cursor: 0,
            next_seq: 0,
            capacity,
        }
    }

    /// Append an event.
    pub fn push(&mut self, event: LogEvent) {
        if event.kind == LogKind::Received {
            if let Some(index) = self.open_partial {
                if !event.is_partial {
                    self.open_partial = None;
                }
                self.entries[index].event = event;
                return;
            }
            if event.is_partial {
                self.open_partial = Some(self.entries.len());
            }
        }

        self.entries.push_back(Entry {
            seq: self.next_seq,
            event,
        });
        self.next_seq += 1;
        self.evict();
    }

    fn evict(&mut self) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            self.cursor = self.cursor.saturating_sub(1);
            self.open_partial = self.open_partial.and_then(|i| i.checked_sub(1));
        }
    }

    /// All events, marking everything settled as read.
    pub fn read_all(&mut self) -> Vec<LogEvent> {
        let events = self.snapshot();
        self.cursor = self.settled_len();
        events
    }

    /// Events not returned by a previous read.
    ///
    /// The cursor never moves past an open partial line, so its completed
    /// version is returned again by the next read.
    pub fn read_since_last(&mut self) -> Vec<LogEvent> {
        let events = self
            .entries
            .iter()
            .skip(self.cursor)
            .map(|e| e.event.clone())
            .collect();
        self.cursor = self.settled_len();
        events
    }

    /// All events without touching the read cursor.
    pub fn snapshot(&self) -> Vec<LogEvent> {
        self.entries.iter().map(|e| e.event.clone()).collect()
    }

    /// Current position, covering the open partial line if there is one.
    pub fn mark(&self) -> LogMark {
        match self.open_partial {
            Some(index) => LogMark(self.entries[index].seq),
            None => LogMark(self.next_seq),
        }
    }

    /// Events at or after `mark`.
    pub fn events_since(&self, mark: LogMark) -> Vec<LogEvent> {
        self.entries
            .iter()
            .filter(|e| e.seq >= mark.0)
            .map(|e| e.event.clone())
            .collect()
    }

    /// Number of events held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of events a `read_since_last` would return.
    pub fn unread_count(&self) -> usize {
        self.entries.len() - self.cursor
    }

    /// Drop every event.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.open_partial = None;
        self.cursor = 0;
    }

    fn settled_len(&self) -> usize {
        self.open_partial.unwrap_or(self.entries.len())
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}
