use crate::{
    Result,
    constants::{DEVICE_KEY_HEX_WIDTH, DEVICE_KEY_PRODUCT_PREFIX, DEVICE_KEY_VENDOR_PREFIX},
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Link used to reach a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// USB host connection.
    Usb,

    /// Bluetooth Low Energy connection.
    Ble,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb => write!(f, "USB"),
            Self::Ble => write!(f, "BLE"),
        }
    }
}

/// Vendor/product pair identifying a reader model.
///
/// The canonical text form is `VID=XXXX&PID=XXXX` with each identifier
/// rendered as four upper-case hex digits. This is the key used for
/// allow-list lookups in [`DeviceFilter`](crate::config::DeviceFilter).
///
/// # Examples
///
/// ```
/// use cardbridge_core::DeviceKey;
///
/// let key = DeviceKey::new(0x04E6, 0x5173);
/// assert_eq!(key.to_string(), "VID=04E6&PID=5173");
///
/// let parsed: DeviceKey = "vid=04e6&pid=5173".parse().unwrap();
/// assert_eq!(parsed, key);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceKey {
    vendor_id: u16,
    product_id: u16,
}

impl DeviceKey {
    /// Create a key from raw identifiers.
    #[must_use]
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// Build a key from separate hex strings, as found in filter files.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeviceKey` if either field is empty, longer than
    /// four digits, or not hexadecimal.
    pub fn from_hex_parts(vendor_id: &str, product_id: &str) -> Result<Self> {
        let original = format!("{vendor_id}/{product_id}");
        Ok(Self::new(
            parse_hex_id(vendor_id, &original)?,
            parse_hex_id(product_id, &original)?,
        ))
    }

    #[must_use]
    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    #[must_use]
    pub fn product_id(&self) -> u16 {
        self.product_id
    }
}

fn parse_hex_id(field: &str, original: &str) -> Result<u16> {
    let field = field.trim();
    if field.is_empty()
        || field.len() > DEVICE_KEY_HEX_WIDTH
        || !field.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(Error::InvalidDeviceKey(original.to_string()));
    }
    u16::from_str_radix(field, 16).map_err(|_| Error::InvalidDeviceKey(original.to_string()))
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{DEVICE_KEY_VENDOR_PREFIX}{:04X}{DEVICE_KEY_PRODUCT_PREFIX}{:04X}",
            self.vendor_id, self.product_id
        )
    }
}

impl std::str::FromStr for DeviceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase();
        let (vendor, product) = normalized
            .strip_prefix(DEVICE_KEY_VENDOR_PREFIX)
            .and_then(|rest| rest.split_once(DEVICE_KEY_PRODUCT_PREFIX))
            .ok_or_else(|| Error::InvalidDeviceKey(s.to_string()))?;

        Ok(Self::new(
            parse_hex_id(vendor, s)?,
            parse_hex_id(product, s)?,
        ))
    }
}

impl TryFrom<String> for DeviceKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeviceKey> for String {
    fn from(key: DeviceKey) -> Self {
        key.to_string()
    }
}

/// Description of a discovered reader, as reported to scan callers.
///
/// Immutable once built: a fresh scan produces fresh values instead of
/// updating old ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    identifier: String,
    display_name: String,
    technical_descriptor: String,
}

impl DeviceInfo {
    pub fn new(
        identifier: impl Into<String>,
        display_name: impl Into<String>,
        technical_descriptor: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
            technical_descriptor: technical_descriptor.into(),
        }
    }

    /// Identifier, unique per transport (bus path for USB, address for BLE).
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Human readable name for device pickers.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Transport specific details, e.g. `USB VID=04E6&PID=5173`.
    #[must_use]
    pub fn technical_descriptor(&self) -> &str {
        &self.technical_descriptor
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.identifier)
    }
}

/// Render bytes as contiguous upper-case hex, e.g. `[0x90, 0x00]` -> `"9000"`.
#[must_use]
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Parse contiguous hex (whitespace ignored) into bytes.
///
/// # Errors
/// Returns `Error::InvalidHex` on odd length or non-hex characters.
pub fn hex_to_bytes(input: &str) -> Result<Vec<u8>> {
    let digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&digits).map_err(|e| Error::InvalidHex(format!("{}: {}", input, e)))
}
