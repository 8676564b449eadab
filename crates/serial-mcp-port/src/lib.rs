//! # serial-mcp-port
//!
//! Device boundary for the Serial MCP Server.
//!
//! This crate provides:
//! - The [`PortHandle`] and [`PortDiscovery`] traits sessions talk through
//! - [`StreamDecoder`], incremental UTF-8 and line decoding of inbound bytes
//! - Native serial ports backed by the `serialport` crate
//! - Simulated ports for tests and offline use
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on serial-mcp-core
//! and is used by serial-mcp-session.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decoder;
pub mod native;
pub mod port;
pub mod simulated;

// Re-export commonly used types
pub use decoder::StreamDecoder;
pub use native::{NativeDiscovery, NativePort};
pub use port::{PortDiscovery, PortHandle, PortRequest};
pub use simulated::{SimulatedBus, SimulatedPort};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
