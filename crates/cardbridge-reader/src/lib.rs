//! Smartcard reader adapter core.
//!
//! This crate bridges an event-driven USB/BLE reader driver to the
//! request/response operations a card terminal framework expects from a
//! reader: open a channel, send an APDU, wait for a card. The driver delivers
//! notifications on its own execution context; callers suspend on bounded
//! waits until the matching notification arrives.
//!
//! # Components
//!
//! - [`ReaderSession`]: per-reader state machine and the operations the host
//!   framework calls.
//! - [`DeviceRegistry`]: live map of discovered readers, gated by the
//!   device filter.
//! - [`ScanCoordinator`]: bounded discovery windows with single delivery.
//! - [`ConnectionGate`]: permission handshake ahead of session creation.
//! - [`PluginFacade`]: ties the above together and routes notifications.
//!
//! # Design Philosophy
//!
//! - **Async suspension, not thread blocking**: every wait is an `async fn`
//!   bounded with `tokio::time::timeout` where a bound applies.
//! - **Non-blocking handlers**: notification handlers are plain `fn`s that
//!   update state under a mutex, then signal.
//! - **Object-safe transport**: [`CardTransport`] is used as
//!   `Arc<dyn CardTransport>` so USB and BLE drivers plug in the same way.
//!
//! # Mock Transport
//!
//! [`mock::MockTransport`] records requests and lets tests or demos play the
//! driver side through a [`mock::MockTransportHandle`].
//!
//! [`ReaderSession`]: session::ReaderSession
//! [`DeviceRegistry`]: registry::DeviceRegistry
//! [`ScanCoordinator`]: scan::ScanCoordinator
//! [`ConnectionGate`]: gate::ConnectionGate
//! [`PluginFacade`]: plugin::PluginFacade
//! [`CardTransport`]: transport::CardTransport

pub mod error;
pub mod gate;
pub mod mock;
pub mod plugin;
pub mod registry;
pub mod scan;
pub mod session;
pub mod transport;

// Re-export commonly used types for convenience
pub use error::{ReaderError, Result};
pub use gate::{AuthorizedDevice, ConnectionGate};
pub use plugin::PluginFacade;
pub use registry::{DeviceRegistry, Offer, RegistryEntry};
pub use scan::{ScanCoordinator, ScanHandle};
pub use session::ReaderSession;
pub use transport::{CardTransport, DeviceHandle, TransportError, TransportEvent};
