//! Live map of discovered readers.
//!
//! The registry is written from the notification context (attach/detach) and
//! read from caller tasks (scan snapshots, connect lookups). Every
//! read-modify-write happens inside one critical section.

use crate::transport::DeviceHandle;
use cardbridge_core::{DeviceFilter, DeviceInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// One discovered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Driver handle; not used once the device has detached.
    pub handle: DeviceHandle,

    /// Description given to scan callers.
    pub info: DeviceInfo,

    /// When the device was first accepted.
    pub discovered_at: DateTime<Utc>,
}

/// Outcome of offering a device to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer {
    /// Device matched the filter and was new.
    Added(DeviceInfo),

    /// Device was already known; nothing changed.
    Duplicate,

    /// Device model is not in the allow-list.
    Filtered,
}

/// Filter-gated map from device identifier to entry.
#[derive(Debug)]
pub struct DeviceRegistry {
    filter: DeviceFilter,
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl DeviceRegistry {
    pub fn new(filter: DeviceFilter) -> Self {
        Self {
            filter,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn filter(&self) -> &DeviceFilter {
        &self.filter
    }

    /// Filter the device and add it if it is new.
    pub fn offer(&self, handle: DeviceHandle) -> Offer {
        if !self.filter.matches(&handle.key) {
            debug!("Ignoring {} ({}): not in device filter", handle.identifier, handle.key);
            return Offer::Filtered;
        }

        let mut entries = self.entries();
        if entries.contains_key(&handle.identifier) {
            return Offer::Duplicate;
        }

        let info = handle.to_info();
        debug!("Registered device {}", info);
        entries.insert(
            handle.identifier.clone(),
            RegistryEntry {
                handle,
                info: info.clone(),
                discovered_at: Utc::now(),
            },
        );
        Offer::Added(info)
    }

    /// Forget a device after it detached.
    pub fn remove(&self, identifier: &str) -> Option<RegistryEntry> {
        let removed = self.entries().remove(identifier);
        if removed.is_some() {
            debug!("Removed device {}", identifier);
        }
        removed
    }

    /// Driver handle of a live device.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<DeviceHandle> {
        self.entries()
            .get(identifier)
            .map(|entry| entry.handle.clone())
    }

    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.entries().contains_key(identifier)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Stable copy of the live devices, oldest discovery first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeviceInfo> {
        let mut entries: Vec<(DateTime<Utc>, DeviceInfo)> = self
            .entries()
            .values()
            .map(|entry| (entry.discovered_at, entry.info.clone()))
            .collect();

        entries.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.identifier().cmp(b.1.identifier()))
        });
        entries.into_iter().map(|(_, info)| info).collect()
    }
}
