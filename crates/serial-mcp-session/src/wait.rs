//! Waiting for device output or session state changes.

use regex::Regex;
use std::time::Duration;
use tokio::time::Instant;

use serial_mcp_core::{Error, LogEvent, Result, SessionState};

use crate::controller::SessionController;

/// Condition to wait for on a session.
#[derive(Debug, Clone)]
pub struct WaitCondition {
    /// Pattern (regex) to find in text received after the wait starts
    pub text: Option<String>,

    /// State the session must be in
    pub state: Option<SessionState>,

    /// Maximum time to wait
    pub timeout: Duration,

    /// Polling interval between checks
    pub poll_interval: Duration,
}

impl Default for WaitCondition {
    fn default() -> Self {
        Self {
            text: None,
            state: None,
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl WaitCondition {
    /// Wait for received text matching `pattern`.
    pub fn for_text(pattern: impl Into<String>) -> Self {
        Self {
            text: Some(pattern.into()),
            ..Self::default()
        }
    }

    /// Wait for the session to reach `state`.
    pub fn for_state(state: SessionState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Also require the session to be in `state`.
    pub fn and_state(mut self, state: SessionState) -> Self {
        self.state = Some(state);
        self
    }

    /// Set timeout duration.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn compile(&self) -> Result<Option<Regex>> {
        if self.text.is_none() && self.state.is_none() {
            return Err(Error::InvalidInput(
                "wait condition needs a text pattern or a state".to_string(),
            ));
        }
        self.text
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| Error::InvalidInput(format!("Invalid regex: {e}")))
    }
}

/// Result of a wait operation.
#[derive(Debug, Clone)]
pub struct WaitResult {
    /// Whether the condition was met
    pub condition_met: bool,

    /// Time waited in milliseconds
    pub waited_ms: u64,

    /// Session state when the wait ended
    pub state: SessionState,

    /// Received line that matched the pattern
    pub matched: Option<String>,

    /// Events logged while waiting
    pub events: Vec<LogEvent>,
}

/// First received line matching `pattern`.
fn find_match(events: &[LogEvent], pattern: &Regex) -> Option<String> {
    events
        .iter()
        .filter(|e| e.is_received())
        .map(|e| e.text())
        .find(|text| pattern.is_match(text))
        .map(|text| text.into_owned())
}

impl SessionController {
    /// Wait until `condition` holds or its timeout passes.
    ///
    /// Only text received after the call is searched. A timeout is not an
    /// error: the result has `condition_met == false`.
    ///
    /// # Example
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use std::time::Duration;
    /// # use serial_mcp_port::SimulatedBus;
    /// # use serial_mcp_session::{SessionController, SessionOptions, WaitCondition};
    /// # async fn example() -> serial_mcp_core::Result<()> {
    /// # let session = SessionController::new(SimulatedBus::new(), SessionOptions::default());
    /// session.send("AT").await?;
    /// let result = session
    ///     .wait_for(&WaitCondition::for_text("^OK$").with_timeout(Duration::from_secs(2)))
    ///     .await?;
    /// if result.condition_met {
    ///     println!("Device answered after {}ms", result.waited_ms);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn wait_for(&self, condition: &WaitCondition) -> Result<WaitResult> {
        let pattern = condition.compile()?;
        let start = Instant::now();
        let mark = self.log_mark();

        loop {
            let events = self.log_since(mark);
            let state = self.state();
            let matched = pattern.as_ref().and_then(|p| find_match(&events, p));

            let text_ok = pattern.is_none() || matched.is_some();
            let state_ok = condition.state.map_or(true, |s| s == state);
            let elapsed = start.elapsed();

            if (text_ok && state_ok) || elapsed >= condition.timeout {
                return Ok(WaitResult {
                    condition_met: text_ok && state_ok,
                    waited_ms: elapsed.as_millis() as u64,
                    state,
                    matched,
                    events,
                });
            }

            let remaining = condition.timeout - elapsed;
            tokio::time::sleep(condition.poll_interval.min(remaining)).await;
        }
    }
}
