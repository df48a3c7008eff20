//! Authorization handshake ahead of session creation.
//!
//! USB hosts must ask the user before talking to a device, and BLE links must
//! finish pairing. The gate checks whether access is already granted; if not
//! it asks the transport, parks the caller on a oneshot keyed by device
//! identifier, and creates the native session once the grant arrives.

use crate::error::{ReaderError, Result};
use crate::registry::DeviceRegistry;
use crate::transport::{CardTransport, DeviceHandle};
use cardbridge_core::DeviceInfo;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// A device the transport opened a session on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedDevice {
    /// Description of the device.
    pub info: DeviceInfo,

    /// Reader name the transport uses in card events.
    pub reader_name: String,
}

/// Resolves permission requests and creates transport sessions.
pub struct ConnectionGate {
    registry: Arc<DeviceRegistry>,
    transport: Arc<dyn CardTransport>,
    timeout: Duration,
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
}

impl ConnectionGate {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        transport: Arc<dyn CardTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            transport,
            timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<bool>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make sure the transport may talk to `identifier`.
    ///
    /// # Errors
    ///
    /// - `UnknownDevice` if the device is not in the live registry; no
    ///   transport call is made.
    /// - `AuthorizationDenied` if the request is refused.
    /// - `Timeout` if no answer arrives in time.
    /// - `Disconnected` if the device detaches while the request is pending.
    pub async fn authorize(&self, identifier: &str) -> Result<DeviceHandle> {
        let device = self
            .registry
            .get(identifier)
            .ok_or_else(|| ReaderError::unknown_device(identifier))?;

        if self.transport.has_authorization(&device) {
            debug!("Device {} already authorized", identifier);
            return Ok(device);
        }

        let (tx, rx) = oneshot::channel();
        if self.pending().insert(identifier.to_string(), tx).is_some() {
            debug!("Replacing pending authorization request for {}", identifier);
        }

        info!("Requesting authorization for {}", identifier);
        if let Err(e) = self.transport.request_authorization(&device) {
            self.pending().remove(identifier);
            return Err(e.into());
        }

        let granted = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(granted)) => granted,
            Ok(Err(_)) => {
                debug!("Authorization request for {} abandoned", identifier);
                return Err(ReaderError::disconnected(identifier));
            }
            Err(_) => {
                self.pending().remove(identifier);
                let duration_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    "No authorization answer for {} after {}ms",
                    identifier, duration_ms
                );
                return Err(ReaderError::timeout(duration_ms));
            }
        };

        if !granted {
            warn!("Authorization denied for {}", identifier);
            return Err(ReaderError::authorization_denied(identifier));
        }

        // The device may have gone away while the prompt was up.
        self.registry
            .get(identifier)
            .ok_or_else(|| ReaderError::disconnected(identifier))
    }

    /// Authorize `identifier` and open a transport session on it.
    pub async fn connect(&self, identifier: &str) -> Result<AuthorizedDevice> {
        let device = self.authorize(identifier).await?;
        let reader_name = self.transport.create_session(&device)?;

        info!("Session {} created on {}", reader_name, identifier);
        Ok(AuthorizedDevice {
            info: device.to_info(),
            reader_name,
        })
    }

    /// Answer to a pending authorization request.
    pub fn on_authorization_result(&self, identifier: &str, granted: bool) {
        match self.pending().remove(identifier) {
            Some(tx) => {
                if tx.send(granted).is_err() {
                    debug!("Authorization waiter for {} is gone", identifier);
                }
            }
            None => debug!(
                "Ignoring unsolicited authorization result for {}",
                identifier
            ),
        }
    }

    /// Drop a pending request; the waiter fails with `Disconnected`.
    pub fn cancel(&self, identifier: &str) {
        if self.pending().remove(identifier).is_some() {
            debug!("Cancelled authorization request for {}", identifier);
        }
    }

    #[must_use]
    pub fn has_pending(&self, identifier: &str) -> bool {
        self.pending().contains_key(identifier)
    }
}
