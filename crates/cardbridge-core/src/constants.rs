//! Reference constants for the reader adapter.
//!
//! Timeouts here are the defaults used when a [`PluginConfig`] does not
//! override them. They match the values the reader firmware vendors document
//! for card power-up and APDU round trips over USB and BLE links.
//!
//! # Usage
//!
//! ```
//! use cardbridge_core::constants::*;
//! use std::time::Duration;
//!
//! let open = Duration::from_millis(DEFAULT_CHANNEL_OPEN_TIMEOUT_MS);
//! assert_eq!(open, Duration::from_secs(5));
//! ```
//!
//! [`PluginConfig`]: crate::config::PluginConfig

// ============================================================================
// Reader Session Timeouts
// ============================================================================

/// Maximum time to wait for the card-connected notification after asking the
/// transport to power up the card (milliseconds).
pub const DEFAULT_CHANNEL_OPEN_TIMEOUT_MS: u64 = 5000;

/// Maximum time to wait for an APDU response after handing the command to the
/// transport (milliseconds).
pub const DEFAULT_TRANSMIT_TIMEOUT_MS: u64 = 5000;

// ============================================================================
// Discovery and Authorization
// ============================================================================

/// Maximum time to wait for the user to answer a device permission prompt
/// (milliseconds).
pub const DEFAULT_AUTHORIZATION_TIMEOUT_MS: u64 = 30_000;

/// Default scan window when none is configured (seconds).
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 10;

/// Plugin name used when the configuration does not provide one.
pub const DEFAULT_PLUGIN_NAME: &str = "CardbridgePlugin";

// ============================================================================
// Device Key Format
// ============================================================================

/// Prefix of the vendor identifier in a canonical device key.
///
/// # Examples
///
/// ```
/// use cardbridge_core::constants::{DEVICE_KEY_PRODUCT_PREFIX, DEVICE_KEY_VENDOR_PREFIX};
///
/// let key = format!("{DEVICE_KEY_VENDOR_PREFIX}04E6{DEVICE_KEY_PRODUCT_PREFIX}5173");
/// assert_eq!(key, "VID=04E6&PID=5173");
/// ```
pub const DEVICE_KEY_VENDOR_PREFIX: &str = "VID=";

/// Separator and prefix of the product identifier in a canonical device key.
pub const DEVICE_KEY_PRODUCT_PREFIX: &str = "&PID=";

/// Number of hex digits used for each identifier in a device key.
pub const DEVICE_KEY_HEX_WIDTH: usize = 4;
