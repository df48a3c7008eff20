//! Boundary with the USB/BLE transport driver.
//!
//! The driver itself lives outside this crate. It is reached through two
//! surfaces:
//!
//! - [`CardTransport`]: requests the adapter core makes. All of them are
//!   non-blocking; results arrive later as events.
//! - [`TransportEvent`]: notifications the driver delivers, from its own
//!   execution context, to [`PluginFacade::dispatch`].
//!
//! [`PluginFacade::dispatch`]: crate::plugin::PluginFacade::dispatch

use cardbridge_core::{DeviceInfo, DeviceKey, TransportKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures reported synchronously by a transport driver.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("No reader session named {0}")]
    UnknownReader(String),

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),
}

/// Transport-owned description of an attached device.
///
/// The driver keeps the native resources; this value only names them. Once a
/// detach has been delivered for `identifier`, the handle must not be passed
/// back to the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Identifier unique per transport (bus path, BLE address).
    pub identifier: String,

    /// Product name reported by the device.
    pub name: String,

    /// Vendor/product pair used for filtering.
    pub key: DeviceKey,

    /// Link the device is reached over.
    pub kind: TransportKind,
}

impl DeviceHandle {
    pub fn new(
        identifier: impl Into<String>,
        name: impl Into<String>,
        key: DeviceKey,
        kind: TransportKind,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
            key,
            kind,
        }
    }

    /// Build the immutable description handed to scan callers.
    #[must_use]
    pub fn to_info(&self) -> DeviceInfo {
        DeviceInfo::new(
            self.identifier.clone(),
            self.name.clone(),
            format!("{} {}", self.kind, self.key),
        )
    }
}

/// Notification delivered by the transport driver.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportEvent {
    /// A device appeared on the bus or in BLE range.
    DeviceAttached(DeviceHandle),

    /// A device went away.
    DeviceDetached { identifier: String },

    /// Answer to an authorization request.
    AuthorizationResult { identifier: String, granted: bool },

    /// The card in `reader` is powered and addressable.
    CardConnected { reader: String },

    /// Response bytes for the last transmitted APDU.
    CardResponseReceived { reader: String, data: Vec<u8> },

    /// A card was inserted into or removed from `reader`.
    CardPresenceChanged { reader: String, present: bool },

    /// The reader or the card reported a failure.
    ReaderOrCardError { reader: String },
}

/// Requests the adapter core sends to the driver.
///
/// Implementations must not block: anything that needs the device to answer
/// is reported later as a [`TransportEvent`].
pub trait CardTransport: Send + Sync {
    /// Link this driver speaks.
    fn kind(&self) -> TransportKind;

    /// Devices currently present.
    fn enumerate_devices(&self) -> Result<Vec<DeviceHandle>, TransportError>;

    /// Whether the platform already allows access to `device`.
    fn has_authorization(&self, device: &DeviceHandle) -> bool;

    /// Ask the platform (usually the user) for access to `device`.
    ///
    /// The answer arrives as [`TransportEvent::AuthorizationResult`].
    fn request_authorization(&self, device: &DeviceHandle) -> Result<(), TransportError>;

    /// Open a native session on an authorized device.
    ///
    /// Returns the reader name the driver will use in card events.
    fn create_session(&self, device: &DeviceHandle) -> Result<String, TransportError>;

    /// Power up the card; completion is reported as [`TransportEvent::CardConnected`].
    fn card_connect(&self, reader: &str) -> Result<(), TransportError>;

    /// Send an APDU; the answer is reported as [`TransportEvent::CardResponseReceived`].
    fn transmit(&self, reader: &str, apdu: &[u8]) -> Result<(), TransportError>;

    /// Power down the card.
    fn disconnect(&self, reader: &str) -> Result<(), TransportError>;

    /// Driver-side connection flag for the physical channel.
    fn is_connected(&self, reader: &str) -> bool;

    /// Driver-side card presence flag.
    fn is_card_present(&self, reader: &str) -> bool;

    /// Answer-to-reset of the current card, if any.
    fn power_on_data(&self, reader: &str) -> Option<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/dev/bus/usb/001/004", TransportKind::Usb, "USB VID=04E6&PID=5173")]
    #[case("C4:7F:51:00:12:34", TransportKind::Ble, "BLE VID=04E6&PID=5173")]
    fn test_device_handle_to_info(
        #[case] identifier: &str,
        #[case] kind: TransportKind,
        #[case] descriptor: &str,
    ) {
        let handle = DeviceHandle::new(identifier, "SCR3310", DeviceKey::new(0x04E6, 0x5173), kind);

        let info = handle.to_info();
        assert_eq!(info.identifier(), identifier);
        assert_eq!(info.display_name(), "SCR3310");
        assert_eq!(info.technical_descriptor(), descriptor);
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(
            TransportError::UnknownReader("r1".into()).to_string(),
            "No reader session named r1"
        );
        assert_eq!(
            TransportError::DeviceNotFound("dev".into()).to_string(),
            "Device not found: dev"
        );
    }
}
