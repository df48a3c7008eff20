//! Mock transport driver for testing and development.
//!
//! This module provides an in-memory [`CardTransport`] that records every
//! request it receives and lets a [`MockTransportHandle`] play the driver's
//! side: attach devices, answer permission prompts, insert cards and return
//! APDU responses.

use crate::transport::{CardTransport, DeviceHandle, TransportError, TransportEvent};
use cardbridge_core::TransportKind;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Request recorded by the mock transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    EnumerateDevices,
    RequestAuthorization(String),
    CreateSession(String),
    CardConnect(String),
    Transmit { reader: String, apdu: Vec<u8> },
    Disconnect(String),
}

#[derive(Debug, Default)]
struct MockReader {
    connected: bool,
    atr: Option<Vec<u8>>,
}

#[derive(Debug)]
struct MockState {
    devices: Vec<DeviceHandle>,
    authorized: HashSet<String>,
    sessions: HashSet<String>,
    readers: HashMap<String, MockReader>,
    responses: VecDeque<Vec<u8>>,
    auto_connect: bool,
    fail_writes: bool,
    calls: Vec<TransportCall>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            authorized: HashSet::new(),
            sessions: HashSet::new(),
            readers: HashMap::new(),
            responses: VecDeque::new(),
            auto_connect: true,
            fail_writes: false,
            calls: Vec::new(),
        }
    }
}

impl MockState {
    fn require_session(&self, reader: &str) -> Result<(), TransportError> {
        if self.sessions.contains(reader) {
            Ok(())
        } else {
            Err(TransportError::UnknownReader(reader.to_string()))
        }
    }
}

#[derive(Debug, Clone)]
struct Shared {
    state: Arc<Mutex<MockState>>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn post(&self, event: TransportEvent) {
        // Receiver may be gone in tests that drive the session directly.
        let _ = self.event_tx.send(event);
    }
}

/// Mock transport driver.
///
/// Reader names are the device identifiers. Card requests for a reader with
/// no session fail with [`TransportError::UnknownReader`]. Card events are posted to the
/// channel returned by [`MockTransport::new`].
///
/// # Examples
///
/// ```
/// use cardbridge_reader::mock::MockTransport;
/// use cardbridge_reader::transport::{CardTransport, DeviceHandle};
/// use cardbridge_core::{DeviceKey, TransportKind};
///
/// let (transport, handle, _events) = MockTransport::new();
/// handle.add_device(DeviceHandle::new(
///     "usb-1",
///     "SCR3310",
///     DeviceKey::new(0x04E6, 0x5173),
///     TransportKind::Usb,
/// ));
///
/// assert_eq!(transport.enumerate_devices().unwrap().len(), 1);
/// ```
#[derive(Debug)]
pub struct MockTransport {
    kind: TransportKind,
    shared: Shared,
}

impl MockTransport {
    /// Create a USB mock transport.
    ///
    /// Returns the transport, the handle controlling it and the receiving end
    /// of its event channel.
    pub fn new() -> (
        Self,
        MockTransportHandle,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        Self::with_kind(TransportKind::Usb)
    }

    /// Create a mock transport for the given link type.
    pub fn with_kind(
        kind: TransportKind,
    ) -> (
        Self,
        MockTransportHandle,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Shared {
            state: Arc::new(Mutex::new(MockState::default())),
            event_tx,
        };

        let transport = Self {
            kind,
            shared: shared.clone(),
        };

        (transport, MockTransportHandle { shared }, event_rx)
    }
}

impl CardTransport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceHandle>, TransportError> {
        let mut state = self.shared.state();
        state.calls.push(TransportCall::EnumerateDevices);
        Ok(state.devices.clone())
    }

    fn has_authorization(&self, device: &DeviceHandle) -> bool {
        self.shared.state().authorized.contains(&device.identifier)
    }

    fn request_authorization(&self, device: &DeviceHandle) -> Result<(), TransportError> {
        let mut state = self.shared.state();
        state
            .calls
            .push(TransportCall::RequestAuthorization(device.identifier.clone()));

        if state.devices.iter().any(|d| d.identifier == device.identifier) {
            Ok(())
        } else {
            Err(TransportError::DeviceNotFound(device.identifier.clone()))
        }
    }

    fn create_session(&self, device: &DeviceHandle) -> Result<String, TransportError> {
        let mut state = self.shared.state();
        state
            .calls
            .push(TransportCall::CreateSession(device.identifier.clone()));

        if !state.authorized.contains(&device.identifier) {
            return Err(TransportError::OpenFailed(format!(
                "{} is not authorized",
                device.identifier
            )));
        }

        state.sessions.insert(device.identifier.clone());
        state.readers.entry(device.identifier.clone()).or_default();
        Ok(device.identifier.clone())
    }

    fn card_connect(&self, reader: &str) -> Result<(), TransportError> {
        let connected = {
            let mut state = self.shared.state();
            state.calls.push(TransportCall::CardConnect(reader.to_string()));
            state.require_session(reader)?;

            let auto_connect = state.auto_connect;
            let entry = state.readers.entry(reader.to_string()).or_default();
            if auto_connect && entry.atr.is_some() {
                entry.connected = true;
                true
            } else {
                false
            }
        };

        if connected {
            self.shared.post(TransportEvent::CardConnected {
                reader: reader.to_string(),
            });
        }
        Ok(())
    }

    fn transmit(&self, reader: &str, apdu: &[u8]) -> Result<(), TransportError> {
        let response = {
            let mut state = self.shared.state();
            state.calls.push(TransportCall::Transmit {
                reader: reader.to_string(),
                apdu: apdu.to_vec(),
            });
            state.require_session(reader)?;
            if state.fail_writes {
                return Err(TransportError::WriteFailed(format!(
                    "{} rejected {} byte(s)",
                    reader,
                    apdu.len()
                )));
            }
            state.responses.pop_front()
        };

        if let Some(data) = response {
            self.shared.post(TransportEvent::CardResponseReceived {
                reader: reader.to_string(),
                data,
            });
        }
        Ok(())
    }

    fn disconnect(&self, reader: &str) -> Result<(), TransportError> {
        let mut state = self.shared.state();
        state.calls.push(TransportCall::Disconnect(reader.to_string()));
        state.require_session(reader)?;
        if let Some(entry) = state.readers.get_mut(reader) {
            entry.connected = false;
        }
        Ok(())
    }

    fn is_connected(&self, reader: &str) -> bool {
        self.shared
            .state()
            .readers
            .get(reader)
            .is_some_and(|r| r.connected)
    }

    fn is_card_present(&self, reader: &str) -> bool {
        self.shared
            .state()
            .readers
            .get(reader)
            .is_some_and(|r| r.atr.is_some())
    }

    fn power_on_data(&self, reader: &str) -> Option<Vec<u8>> {
        self.shared
            .state()
            .readers
            .get(reader)
            .and_then(|r| r.atr.clone())
    }
}

/// Handle for playing the driver side of a [`MockTransport`].
///
/// Methods that represent something happening on the device also post the
/// matching [`TransportEvent`].
#[derive(Debug, Clone)]
pub struct MockTransportHandle {
    shared: Shared,
}

impl MockTransportHandle {
    /// Make a device visible to enumeration without posting an attach event.
    pub fn add_device(&self, device: DeviceHandle) {
        let mut state = self.shared.state();
        state.devices.retain(|d| d.identifier != device.identifier);
        state.devices.push(device);
    }

    /// Plug a device in.
    pub fn attach(&self, device: DeviceHandle) {
        self.add_device(device.clone());
        self.shared.post(TransportEvent::DeviceAttached(device));
    }

    /// Unplug a device.
    pub fn detach(&self, identifier: &str) {
        {
            let mut state = self.shared.state();
            state.devices.retain(|d| d.identifier != identifier);
            state.authorized.remove(identifier);
            state.sessions.remove(identifier);
            state.readers.remove(identifier);
        }
        self.shared.post(TransportEvent::DeviceDetached {
            identifier: identifier.to_string(),
        });
    }

    /// Grant access without prompting, as if granted in an earlier run.
    pub fn pre_authorize(&self, identifier: &str) {
        self.shared.state().authorized.insert(identifier.to_string());
    }

    /// Answer a permission prompt positively.
    pub fn grant(&self, identifier: &str) {
        self.pre_authorize(identifier);
        self.shared.post(TransportEvent::AuthorizationResult {
            identifier: identifier.to_string(),
            granted: true,
        });
    }

    /// Answer a permission prompt negatively.
    pub fn deny(&self, identifier: &str) {
        self.shared.state().authorized.remove(identifier);
        self.shared.post(TransportEvent::AuthorizationResult {
            identifier: identifier.to_string(),
            granted: false,
        });
    }

    /// Put a card with the given ATR into `reader`.
    pub fn insert_card(&self, reader: &str, atr: Vec<u8>) {
        self.shared
            .state()
            .readers
            .entry(reader.to_string())
            .or_default()
            .atr = Some(atr);
        self.shared.post(TransportEvent::CardPresenceChanged {
            reader: reader.to_string(),
            present: true,
        });
    }

    /// Take the card out of `reader`.
    pub fn remove_card(&self, reader: &str) {
        if let Some(entry) = self.shared.state().readers.get_mut(reader) {
            entry.atr = None;
            entry.connected = false;
        }
        self.shared.post(TransportEvent::CardPresenceChanged {
            reader: reader.to_string(),
            present: false,
        });
    }

    /// Report the card in `reader` as connected.
    pub fn connect_card(&self, reader: &str) {
        self.shared
            .state()
            .readers
            .entry(reader.to_string())
            .or_default()
            .connected = true;
        self.shared.post(TransportEvent::CardConnected {
            reader: reader.to_string(),
        });
    }

    /// Deliver response bytes for `reader`.
    pub fn respond(&self, reader: &str, data: Vec<u8>) {
        self.shared.post(TransportEvent::CardResponseReceived {
            reader: reader.to_string(),
            data,
        });
    }

    /// Queue a response returned automatically by the next transmit.
    pub fn queue_response(&self, data: Vec<u8>) {
        self.shared.state().responses.push_back(data);
    }

    /// Report a reader or card failure.
    pub fn fail_reader(&self, reader: &str) {
        self.shared.post(TransportEvent::ReaderOrCardError {
            reader: reader.to_string(),
        });
    }

    /// Make every following transmit fail synchronously.
    pub fn set_fail_writes(&self, enabled: bool) {
        self.shared.state().fail_writes = enabled;
    }

    /// Whether `card_connect` confirms by itself when a card is inserted.
    pub fn set_auto_connect(&self, enabled: bool) {
        self.shared.state().auto_connect = enabled;
    }

    /// Post an arbitrary event.
    pub fn post(&self, event: TransportEvent) {
        self.shared.post(event);
    }

    /// Requests received so far.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.shared.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.shared.state().calls.clear();
    }
}
