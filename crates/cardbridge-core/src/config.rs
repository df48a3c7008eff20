//! Configuration for the reader adapter.
//!
//! Two pieces of configuration come from outside the process:
//!
//! - the **device filter**, an allow-list of vendor/product pairs that decides
//!   which attached readers are offered to scan callers, and
//! - the **plugin configuration**, which carries the filter plus the session
//!   timeouts and the default scan window.
//!
//! Both are read from TOML. A standalone filter file looks like:
//!
//! ```toml
//! [[device]]
//! vendor_id = "04E6"
//! product_id = "5173"
//! ```
//!
//! A plugin configuration file embeds the same `[[device]]` tables:
//!
//! ```toml
//! name = "FrontDeskReaders"
//! scan_timeout_secs = 5
//!
//! [timeouts]
//! channel_open_ms = 5000
//! transmit_ms = 3000
//!
//! [[device]]
//! vendor_id = "04E6"
//! product_id = "5173"
//! ```

use crate::{
    Result,
    constants::{
        DEFAULT_AUTHORIZATION_TIMEOUT_MS, DEFAULT_CHANNEL_OPEN_TIMEOUT_MS, DEFAULT_PLUGIN_NAME,
        DEFAULT_SCAN_TIMEOUT_SECS, DEFAULT_TRANSMIT_TIMEOUT_MS,
    },
    error::Error,
    types::DeviceKey,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Allow-list of reader models.
///
/// Membership is tested on the canonical [`DeviceKey`]. An empty filter
/// matches nothing.
///
/// # Examples
///
/// ```
/// use cardbridge_core::{DeviceFilter, DeviceKey};
///
/// let filter = DeviceFilter::parse_keys(["VID=04E6&PID=5173"]).unwrap();
/// assert!(filter.matches(&DeviceKey::new(0x04E6, 0x5173)));
/// assert!(!filter.matches(&DeviceKey::new(0x072F, 0x90CC)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    keys: HashSet<DeviceKey>,
}

/// One `[[device]]` table in a filter or plugin file.
#[derive(Debug, Deserialize)]
struct FilterEntry {
    vendor_id: String,
    product_id: String,
}

#[derive(Debug, Deserialize)]
struct FilterFile {
    #[serde(default)]
    device: Vec<FilterEntry>,
}

impl DeviceFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a filter from already parsed keys.
    pub fn from_keys(keys: impl IntoIterator<Item = DeviceKey>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Build a filter from canonical `VID=XXXX&PID=XXXX` strings.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeviceKey` for the first malformed entry.
    pub fn parse_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let keys = keys
            .into_iter()
            .map(str::parse)
            .collect::<Result<HashSet<DeviceKey>>>()?;
        Ok(Self { keys })
    }

    /// Parse a filter from TOML `[[device]]` tables.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: FilterFile = toml::from_str(content)?;
        Self::from_entries(&file.device)
    }

    /// Load a filter file from disk.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    fn from_entries(entries: &[FilterEntry]) -> Result<Self> {
        let keys = entries
            .iter()
            .map(|entry| DeviceKey::from_hex_parts(&entry.vendor_id, &entry.product_id))
            .collect::<Result<HashSet<DeviceKey>>>()?;
        Ok(Self { keys })
    }

    /// Add a key to the allow-list.
    pub fn allow(&mut self, key: DeviceKey) {
        self.keys.insert(key);
    }

    /// Check whether a reader model is allowed.
    #[must_use]
    pub fn matches(&self, key: &DeviceKey) -> bool {
        self.keys.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceKey> {
        self.keys.iter()
    }
}

/// Bounded waits applied by reader sessions and the connection gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Wait for the card-connected notification after a power-up request.
    pub channel_open: Duration,

    /// Wait for an APDU response.
    pub transmit: Duration,

    /// Wait for the user to answer a permission prompt.
    pub authorization: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            channel_open: Duration::from_millis(DEFAULT_CHANNEL_OPEN_TIMEOUT_MS),
            transmit: Duration::from_millis(DEFAULT_TRANSMIT_TIMEOUT_MS),
            authorization: Duration::from_millis(DEFAULT_AUTHORIZATION_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TimeoutsFile {
    channel_open_ms: Option<u64>,
    transmit_ms: Option<u64>,
    authorization_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PluginConfigFile {
    name: Option<String>,
    scan_timeout_secs: Option<u64>,
    #[serde(default)]
    timeouts: TimeoutsFile,
    #[serde(default)]
    device: Vec<FilterEntry>,
}

/// Settings for one plugin instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    /// Logical plugin name reported to the host framework.
    pub name: String,

    /// Reader models offered to scan callers.
    pub filter: DeviceFilter,

    /// Session and authorization timeouts.
    pub timeouts: SessionTimeouts,

    /// Scan window used when the caller does not pick one.
    pub scan_timeout: Duration,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_PLUGIN_NAME.to_string(),
            filter: DeviceFilter::new(),
            timeouts: SessionTimeouts::default(),
            scan_timeout: Duration::from_secs(DEFAULT_SCAN_TIMEOUT_SECS),
        }
    }
}

impl PluginConfig {
    /// Default settings with the given filter.
    pub fn with_filter(filter: DeviceFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Parse a plugin configuration from TOML.
    ///
    /// # Errors
    /// Returns `Error::ConfigParse` on malformed TOML, `Error::InvalidDeviceKey`
    /// on a bad filter entry and `Error::Config` on zero timeouts.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: PluginConfigFile = toml::from_str(content)?;
        let defaults = SessionTimeouts::default();

        let timeouts = SessionTimeouts {
            channel_open: file
                .timeouts
                .channel_open_ms
                .map_or(defaults.channel_open, Duration::from_millis),
            transmit: file
                .timeouts
                .transmit_ms
                .map_or(defaults.transmit, Duration::from_millis),
            authorization: file
                .timeouts
                .authorization_ms
                .map_or(defaults.authorization, Duration::from_millis),
        };

        if timeouts.channel_open.is_zero()
            || timeouts.transmit.is_zero()
            || timeouts.authorization.is_zero()
        {
            return Err(Error::Config("timeouts must be greater than zero".into()));
        }

        let name = file.name.unwrap_or_else(|| DEFAULT_PLUGIN_NAME.to_string());
        if name.trim().is_empty() {
            return Err(Error::Config("plugin name must not be empty".into()));
        }

        Ok(Self {
            name,
            filter: DeviceFilter::from_entries(&file.device)?,
            timeouts,
            scan_timeout: Duration::from_secs(
                file.scan_timeout_secs.unwrap_or(DEFAULT_SCAN_TIMEOUT_SECS),
            ),
        })
    }

    /// Load a plugin configuration file from disk.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
