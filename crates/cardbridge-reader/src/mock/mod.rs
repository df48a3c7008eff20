//! Mock implementations for testing and development.
//!
//! This module provides a simulated transport driver that can be controlled
//! programmatically without requiring physical readers.

pub mod transport;

// Re-export commonly used types
pub use transport::{MockTransport, MockTransportHandle, TransportCall};
