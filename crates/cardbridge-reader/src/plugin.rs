//! Plugin facade over one transport.
//!
//! The facade owns the discovery pieces ([`DeviceRegistry`],
//! [`ScanCoordinator`], [`ConnectionGate`]) and the live [`ReaderSession`]s,
//! and routes transport notifications to them.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐  TransportEvent  ┌──────────────┐
//! │ Transport │─────(mpsc)──────►│ event loop   │──► dispatch
//! │ driver    │                  │ task         │
//! └───────────┘                  └──────────────┘
//!                                                       │
//!        ┌──────────────────┬──────────────────┬────────┴─────────┐
//!        ▼                  ▼                  ▼                  ▼
//!  ScanCoordinator    ConnectionGate     ReaderSession(s)    DeviceRegistry
//!  (attach)           (authorization)    (card events)       (detach)
//! ```
//!
//! Drivers that call back on their own thread can call
//! [`PluginFacade::dispatch`] directly instead of using the event loop.
//!
//! # Examples
//!
//! ```no_run
//! use cardbridge_core::{DeviceFilter, PluginConfig};
//! use cardbridge_reader::mock::MockTransport;
//! use cardbridge_reader::plugin::PluginFacade;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> cardbridge_reader::Result<()> {
//!     let filter = DeviceFilter::parse_keys(["VID=04E6&PID=5173"])?;
//!     let (transport, _driver, events) = MockTransport::new();
//!
//!     let plugin = Arc::new(PluginFacade::new(
//!         PluginConfig::with_filter(filter),
//!         Arc::new(transport),
//!     ));
//!     let _events = plugin.clone().spawn_event_loop(events);
//!
//!     let devices = plugin.scan(Duration::from_secs(2), true).await?;
//!     if let Some(device) = devices.first() {
//!         let reader = plugin.connect_to_device(device.identifier()).await?;
//!         reader.open_physical_channel().await?;
//!         let response = reader.transmit_apdu(&[0x00, 0xA4, 0x04, 0x00]).await?;
//!         println!("{:02X?}", response);
//!     }
//!     Ok(())
//! }
//! ```

use crate::error::Result;
use crate::gate::ConnectionGate;
use crate::registry::DeviceRegistry;
use crate::scan::{ScanCoordinator, ScanHandle};
use crate::session::ReaderSession;
use crate::transport::{CardTransport, TransportEvent};
use cardbridge_core::{DeviceInfo, PluginConfig, SessionTimeouts};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A live session and the device it runs on.
#[derive(Debug, Clone)]
struct ReaderSlot {
    device_id: String,
    session: Arc<ReaderSession>,
}

/// One logical plugin: discovery, connection and the readers it opened.
pub struct PluginFacade {
    name: String,
    transport: Arc<dyn CardTransport>,
    registry: Arc<DeviceRegistry>,
    scanner: ScanCoordinator,
    gate: ConnectionGate,
    timeouts: SessionTimeouts,
    scan_timeout: Duration,
    readers: Mutex<HashMap<String, ReaderSlot>>,
}

impl fmt::Debug for PluginFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginFacade")
            .field("name", &self.name)
            .field("transport", &self.transport.kind())
            .field("devices", &self.registry.len())
            .field("readers", &self.reader_names())
            .finish_non_exhaustive()
    }
}

impl PluginFacade {
    pub fn new(config: PluginConfig, transport: Arc<dyn CardTransport>) -> Self {
        let registry = Arc::new(DeviceRegistry::new(config.filter));
        let scanner = ScanCoordinator::new(registry.clone(), transport.clone());
        let gate = ConnectionGate::new(
            registry.clone(),
            transport.clone(),
            config.timeouts.authorization,
        );

        info!(
            "Plugin {} created over {} transport",
            config.name,
            transport.kind()
        );

        Self {
            name: config.name,
            transport,
            registry,
            scanner,
            gate,
            timeouts: config.timeouts,
            scan_timeout: config.scan_timeout,
            readers: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Scan window from the configuration.
    #[must_use]
    pub fn default_scan_timeout(&self) -> Duration {
        self.scan_timeout
    }

    fn readers(&self) -> MutexGuard<'_, HashMap<String, ReaderSlot>> {
        self.readers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Discovery and connection
    // ------------------------------------------------------------------

    /// Start a scan; `on_result` runs once with the matched devices.
    pub fn scan_devices<F>(
        &self,
        timeout: Duration,
        stop_on_first: bool,
        on_result: F,
    ) -> Result<ScanHandle>
    where
        F: FnOnce(Vec<DeviceInfo>) + Send + 'static,
    {
        self.scanner.scan_devices(timeout, stop_on_first, on_result)
    }

    /// Run a scan and wait for its result.
    pub async fn scan(&self, timeout: Duration, stop_on_first: bool) -> Result<Vec<DeviceInfo>> {
        self.scanner.scan(timeout, stop_on_first).await
    }

    /// Authorize a discovered device, open a transport session on it and
    /// register the resulting reader.
    pub async fn connect_to_device(&self, identifier: &str) -> Result<Arc<ReaderSession>> {
        let device = self.gate.connect(identifier).await?;
        let session = Arc::new(ReaderSession::new(
            device.reader_name.clone(),
            self.transport.clone(),
            self.timeouts,
        ));

        let previous = self.readers().insert(
            device.reader_name.clone(),
            ReaderSlot {
                device_id: identifier.to_string(),
                session: session.clone(),
            },
        );
        if let Some(previous) = previous {
            warn!("Replacing existing reader {}", device.reader_name);
            previous.session.on_reader_detached();
        }

        // Card events posted before the slot existed were dropped by `route`.
        if session.check_card_presence() {
            debug!("Card already present in {}", device.reader_name);
        }

        info!(
            "Reader {} registered for {}",
            device.reader_name, device.info
        );
        Ok(session)
    }

    // ------------------------------------------------------------------
    // Readers
    // ------------------------------------------------------------------

    #[must_use]
    pub fn reader(&self, name: &str) -> Option<Arc<ReaderSession>> {
        self.readers().get(name).map(|slot| slot.session.clone())
    }

    /// Names of the registered readers, sorted.
    #[must_use]
    pub fn reader_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.readers().keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove a reader and run its unregister hook.
    pub fn unregister_reader(&self, name: &str) -> Option<Arc<ReaderSession>> {
        let slot = self.readers().remove(name)?;
        slot.session.on_unregister();
        Some(slot.session)
    }

    /// Close any running scan and unregister every reader.
    pub fn shutdown(&self) {
        self.scanner.stop();
        let slots: Vec<ReaderSlot> = self.readers().drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            slot.session.on_unregister();
        }
        info!("Plugin {} shut down", self.name);
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Route one transport notification.
    pub fn dispatch(&self, event: TransportEvent) {
        match event {
            TransportEvent::DeviceAttached(device) => {
                if let Some(info) = self.scanner.on_device_attached(device) {
                    info!("Device attached: {}", info);
                }
            }
            TransportEvent::DeviceDetached { identifier } => self.on_device_detached(&identifier),
            TransportEvent::AuthorizationResult {
                identifier,
                granted,
            } => self.gate.on_authorization_result(&identifier, granted),
            TransportEvent::CardConnected { reader } => {
                if let Some(session) = self.route(&reader) {
                    session.on_card_connected();
                }
            }
            TransportEvent::CardResponseReceived { reader, data } => {
                if let Some(session) = self.route(&reader) {
                    session.on_card_response_received(data);
                }
            }
            TransportEvent::CardPresenceChanged { reader, present } => {
                if let Some(session) = self.route(&reader) {
                    session.on_card_presence_change(present);
                }
            }
            TransportEvent::ReaderOrCardError { reader } => {
                if let Some(session) = self.route(&reader) {
                    session.on_reader_or_card_error();
                }
            }
        }
    }

    fn route(&self, reader: &str) -> Option<Arc<ReaderSession>> {
        let session = self.reader(reader);
        if session.is_none() {
            warn!("Dropping event for unknown reader {}", reader);
        }
        session
    }

    fn on_device_detached(&self, identifier: &str) {
        if self.scanner.on_device_detached(identifier) {
            info!("Device detached: {}", identifier);
        }
        self.gate.cancel(identifier);

        let detached: Vec<ReaderSlot> = {
            let mut readers = self.readers();
            let names: Vec<String> = readers
                .iter()
                .filter(|(_, slot)| slot.device_id == identifier)
                .map(|(name, _)| name.clone())
                .collect();
            names
                .iter()
                .filter_map(|name| readers.remove(name))
                .collect()
        };

        for slot in detached {
            slot.session.on_reader_detached();
            slot.session.on_unregister();
        }
    }

    /// Drain `events` on a dedicated task, dispatching each one.
    ///
    /// The task ends when every sender is dropped.
    pub fn spawn_event_loop(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!("Event loop started for plugin {}", self.name);
            while let Some(event) = events.recv().await {
                self.dispatch(event);
            }
            debug!("Event loop stopped for plugin {}", self.name);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReaderError;
    use crate::mock::{MockTransport, MockTransportHandle};
    use crate::transport::DeviceHandle;
    use cardbridge_core::{DeviceFilter, DeviceKey, TransportKind};

    const KEY: DeviceKey = DeviceKey::new(0x04E6, 0x5173);

    fn device(id: &str) -> DeviceHandle {
        DeviceHandle::new(id, "SCR3310", KEY, TransportKind::Usb)
    }

    fn plugin() -> (Arc<PluginFacade>, MockTransportHandle) {
        let (transport, handle, _events) = MockTransport::new();
        let config = PluginConfig::with_filter(DeviceFilter::from_keys([KEY]));
        (Arc::new(PluginFacade::new(config, Arc::new(transport))), handle)
    }

    async fn connected_reader(
        plugin: &PluginFacade,
        handle: &MockTransportHandle,
        id: &str,
    ) -> Arc<ReaderSession> {
        handle.add_device(device(id));
        handle.pre_authorize(id);
        plugin.scan(Duration::from_millis(10), true).await.unwrap();
        plugin.connect_to_device(id).await.unwrap()
    }

    #[tokio::test]
    async fn test_connect_registers_reader() {
        let (plugin, handle) = plugin();
        let reader = connected_reader(&plugin, &handle, "usb-1").await;

        assert_eq!(reader.name(), "usb-1");
        assert_eq!(plugin.reader_names(), vec!["usb-1".to_string()]);
        assert!(plugin.reader("usb-1").is_some());
    }

    #[tokio::test]
    async fn test_card_events_are_routed() {
        let (plugin, handle) = plugin();
        let reader = connected_reader(&plugin, &handle, "usb-1").await;

        plugin.dispatch(TransportEvent::CardPresenceChanged {
            reader: "usb-1".into(),
            present: true,
        });
        reader.wait_for_card_insertion().await.unwrap();

        plugin.dispatch(TransportEvent::CardConnected {
            reader: "usb-1".into(),
        });
        reader.open_physical_channel().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_picks_up_card_already_present() {
        let (plugin, handle) = plugin();
        handle.insert_card("usb-1", vec![0x3B, 0x00]);

        let reader = connected_reader(&plugin, &handle, "usb-1").await;

        assert!(reader.check_card_presence());
        tokio::time::timeout(Duration::from_secs(1), reader.wait_for_card_insertion())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_event_for_unknown_reader_is_dropped() {
        let (plugin, _handle) = plugin();
        plugin.dispatch(TransportEvent::CardResponseReceived {
            reader: "ghost".into(),
            data: vec![0x90, 0x00],
        });
        assert!(plugin.reader_names().is_empty());
    }

    #[tokio::test]
    async fn test_detach_tears_down_reader() {
        let (plugin, handle) = plugin();
        let reader = connected_reader(&plugin, &handle, "usb-1").await;

        let waiter = reader.clone();
        let wait = tokio::spawn(async move { waiter.wait_for_card_insertion().await });
        tokio::task::yield_now().await;

        plugin.dispatch(TransportEvent::DeviceDetached {
            identifier: "usb-1".into(),
        });

        assert!(matches!(
            wait.await.unwrap(),
            Err(ReaderError::WaitCancelled { .. })
        ));
        assert!(plugin.reader("usb-1").is_none());
        assert!(!plugin.registry().contains("usb-1"));
    }

    #[tokio::test]
    async fn test_unregister_and_shutdown() {
        let (plugin, handle) = plugin();
        connected_reader(&plugin, &handle, "usb-1").await;
        connected_reader(&plugin, &handle, "usb-2").await;

        assert!(plugin.unregister_reader("usb-1").is_some());
        assert!(plugin.unregister_reader("usb-1").is_none());

        plugin.shutdown();
        assert!(plugin.reader_names().is_empty());
    }

    #[tokio::test]
    async fn test_event_loop_dispatches_channel_events() {
        let (transport, handle, events) = MockTransport::new();
        let config = PluginConfig::with_filter(DeviceFilter::from_keys([KEY]));
        let plugin = Arc::new(PluginFacade::new(config, Arc::new(transport)));
        let event_loop = plugin.clone().spawn_event_loop(events);

        handle.add_device(device("usb-1"));
        plugin.scan(Duration::from_millis(10), true).await.unwrap();

        let driver = handle.clone();
        let connecting = plugin.clone();
        let connect = tokio::spawn(async move { connecting.connect_to_device("usb-1").await });
        while !handle
            .calls()
            .contains(&crate::mock::TransportCall::RequestAuthorization("usb-1".into()))
        {
            tokio::task::yield_now().await;
        }
        driver.grant("usb-1");

        let reader = connect.await.unwrap().unwrap();
        assert_eq!(reader.name(), "usb-1");

        drop(handle);
        drop(driver);
        plugin.shutdown();
        // Transport inside the plugin still holds a sender.
        event_loop.abort();
    }
}
