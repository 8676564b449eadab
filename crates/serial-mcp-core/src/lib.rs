//! # serial-mcp-core
//!
//! Core types for the Serial MCP Server.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other serial-mcp crates. It provides:
//!
//! - Connection types (ConnectionConfig, DeviceIdentity, line conventions)
//! - Session types (SessionId, SessionState, SessionInfo)
//! - Log events emitted by sessions
//! - Error types, including the narrow errors reported by ports
//! - Server configuration
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other serial-mcp crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod session;

// Re-export commonly used types
pub use config::{
    DiscoverySettings, ReconnectSettings, SerialSettings, ServerConfig, ServerSettings,
};
pub use connection::{
    ConnectionConfig, DataBits, DeviceIdentity, DisplayFormat, LineTerminator, NewlinePolicy,
    Parity, StopBits,
};
pub use error::{Error, ErrorKind, OpenError, ReadError, Result, UserCancelled, WriteError};
pub use event::{format_hex, LogEvent, LogKind, Payload};
pub use session::{SessionId, SessionInfo, SessionState};
