//! Error types for reader operations.
//!
//! Every error is returned synchronously from the operation that detected it.
//! Failures that happen on the notification side (card removed, reader error)
//! reach the caller through the pending response slot and surface here as
//! [`ReaderError::CardCommunication`].

use crate::transport::TransportError;

/// Result type alias for reader operations.
pub type Result<T> = std::result::Result<T, ReaderError>;

/// Errors that can occur while discovering, connecting to or driving a reader.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// Malformed call or a channel operation the transport refused outright.
    #[error("Reader I/O error: {message}")]
    ReaderIo { message: String },

    /// A transmit finished waiting without a usable response.
    #[error("Card communication error: {message}")]
    CardCommunication { message: String },

    /// Connect requested for a device that is not in the live registry.
    #[error("Unknown device: {identifier}")]
    UnknownDevice { identifier: String },

    /// The user or the platform refused access to the device.
    #[error("Authorization denied for device: {identifier}")]
    AuthorizationDenied { identifier: String },

    /// The card did not report a connection in time.
    #[error("Physical channel open timed out after {duration_ms}ms on {reader}")]
    ChannelOpenTimeout { reader: String, duration_ms: u64 },

    /// Operation timed out after specified duration.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A presence wait was stopped before its condition held.
    #[error("Wait cancelled on {reader}")]
    WaitCancelled { reader: String },

    /// Device is not connected or has been disconnected.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// Transport driver failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Configuration or data format error.
    #[error(transparent)]
    Core(#[from] cardbridge_core::Error),
}

impl ReaderError {
    /// Create a new reader I/O error.
    pub fn reader_io(message: impl Into<String>) -> Self {
        Self::ReaderIo {
            message: message.into(),
        }
    }

    /// Create a new card communication error.
    pub fn card_communication(message: impl Into<String>) -> Self {
        Self::CardCommunication {
            message: message.into(),
        }
    }

    /// Create a new unknown device error.
    pub fn unknown_device(identifier: impl Into<String>) -> Self {
        Self::UnknownDevice {
            identifier: identifier.into(),
        }
    }

    /// Create a new authorization denied error.
    pub fn authorization_denied(identifier: impl Into<String>) -> Self {
        Self::AuthorizationDenied {
            identifier: identifier.into(),
        }
    }

    /// Create a new channel open timeout error.
    pub fn channel_open_timeout(reader: impl Into<String>, duration_ms: u64) -> Self {
        Self::ChannelOpenTimeout {
            reader: reader.into(),
            duration_ms,
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new wait cancelled error.
    pub fn wait_cancelled(reader: impl Into<String>) -> Self {
        Self::WaitCancelled {
            reader: reader.into(),
        }
    }

    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }
}
