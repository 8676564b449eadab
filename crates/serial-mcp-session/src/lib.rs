//! # serial-mcp-session
//!
//! Session lifecycle management for the Serial MCP Server.
//!
//! This crate provides:
//! - The session state machine (connect, disconnect, send, read loop)
//! - Identity-based auto-reconnect with an injectable scheduler
//! - Per-session event log, export and wait-for-output
//! - Session registry management
//!
//! ## Architecture
//!
//! This is Layer 2 in the architecture - it depends on serial-mcp-core
//! and serial-mcp-port to manage serial session lifecycles.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod controller;
pub mod export;
pub mod log;
pub mod manager;
pub mod reconnect;
pub mod wait;

// Re-export commonly used types
pub use controller::{SessionController, SessionOptions};
pub use export::{ExportFormat, LogExporter, DEFAULT_FILE_NAME};
pub use log::{LogBuffer, LogMark};
pub use manager::{SessionManager, SessionManagerConfig};
pub use reconnect::{PeriodicTask, ReconnectPolicy, Scheduler, Tick, TickFuture, TokioScheduler};
pub use wait::{WaitCondition, WaitResult};
