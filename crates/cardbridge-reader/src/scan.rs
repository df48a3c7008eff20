//! Bounded discovery windows.
//!
//! A scan enumerates the devices already present, then keeps accepting
//! attach notifications until its window closes. Results are delivered once,
//! from a timer task, as a snapshot of the registry:
//!
//! ```text
//! scan_devices ──► clear registry ──► enumerate + filter ──► spawn timer
//!                                                               │
//!   on_device_attached ──► filter ──► add ──(stop_on_first)──► deliver now
//!                                                               │
//!                                         sleep(timeout) ──► deliver
//!                                                               │
//!                                                   on_result(snapshot)
//! ```
//!
//! Early delivery does not schedule a second callback: the timer task waits
//! on whichever comes first, the window or the early-delivery signal, and
//! owns the `FnOnce` callback.
//!
//! A scan superseded by a new one delivers the devices it had found; its
//! snapshot is taken before the new scan clears the registry.

use crate::error::{ReaderError, Result};
use crate::registry::{DeviceRegistry, Offer};
use crate::transport::{CardTransport, DeviceHandle};
use cardbridge_core::DeviceInfo;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct ActiveScan {
    id: u64,
    stop_on_first: bool,
    matched: bool,
    deliver_now: Arc<Notify>,
    superseded: SupersededSlot,
}

type ActiveSlot = Arc<Mutex<Option<ActiveScan>>>;

/// Result frozen for a scan that a newer scan replaced.
type SupersededSlot = Arc<Mutex<Option<Vec<DeviceInfo>>>>;

fn lock_active(active: &ActiveSlot) -> MutexGuard<'_, Option<ActiveScan>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lock_superseded(slot: &SupersededSlot) -> MutexGuard<'_, Option<Vec<DeviceInfo>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle on a running scan.
#[derive(Debug)]
pub struct ScanHandle {
    id: u64,
    deliver_now: Arc<Notify>,
    task: JoinHandle<()>,
}

impl ScanHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Close the window now and deliver what has been found.
    pub fn stop(&self) {
        self.deliver_now.notify_one();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the result callback has run.
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            warn!("Scan {} task failed: {}", self.id, e);
        }
    }
}

/// Runs discovery windows over one transport.
pub struct ScanCoordinator {
    registry: Arc<DeviceRegistry>,
    transport: Arc<dyn CardTransport>,
    active: ActiveSlot,
    next_id: AtomicU64,
}

impl ScanCoordinator {
    pub fn new(registry: Arc<DeviceRegistry>, transport: Arc<dyn CardTransport>) -> Self {
        Self {
            registry,
            transport,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start a scan and deliver its result to `on_result` exactly once.
    ///
    /// Must be called from within a Tokio runtime. A scan already running is
    /// closed immediately and delivers its own result.
    ///
    /// # Errors
    ///
    /// Returns the transport error if enumeration fails.
    pub fn scan_devices<F>(
        &self,
        timeout: Duration,
        stop_on_first: bool,
        on_result: F,
    ) -> Result<ScanHandle>
    where
        F: FnOnce(Vec<DeviceInfo>) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deliver_now = Arc::new(Notify::new());
        let superseded: SupersededSlot = Arc::new(Mutex::new(None));

        {
            let mut active = lock_active(&self.active);
            if let Some(previous) = active.take() {
                info!("Scan {} superseded by scan {}", previous.id, id);
                let devices = self.registry.snapshot();
                *lock_superseded(&previous.superseded) = Some(devices);
                previous.deliver_now.notify_one();
            }

            self.registry.clear();
            let matched = self
                .transport
                .enumerate_devices()?
                .into_iter()
                .fold(false, |matched, device| {
                    matches!(self.registry.offer(device), Offer::Added(_)) || matched
                });

            if stop_on_first && matched {
                deliver_now.notify_one();
            }

            *active = Some(ActiveScan {
                id,
                stop_on_first,
                matched,
                deliver_now: deliver_now.clone(),
                superseded: superseded.clone(),
            });
        }

        info!(
            "Scan {} started: window {}ms, stop on first match: {}",
            id,
            timeout.as_millis(),
            stop_on_first
        );

        let task = tokio::spawn(deliver_after(
            id,
            timeout,
            deliver_now.clone(),
            superseded,
            self.active.clone(),
            self.registry.clone(),
            on_result,
        ));

        Ok(ScanHandle {
            id,
            deliver_now,
            task,
        })
    }

    /// Run a scan and wait for its result.
    pub async fn scan(&self, timeout: Duration, stop_on_first: bool) -> Result<Vec<DeviceInfo>> {
        let (tx, rx) = oneshot::channel();
        self.scan_devices(timeout, stop_on_first, move |devices| {
            let _ = tx.send(devices);
        })?;

        rx.await
            .map_err(|_| ReaderError::reader_io("scan ended without delivering results"))
    }

    /// Attach notification. Only accepted while a scan is running.
    pub fn on_device_attached(&self, device: DeviceHandle) -> Option<DeviceInfo> {
        let mut active = lock_active(&self.active);
        let Some(scan) = active.as_mut() else {
            debug!("Ignoring attach of {} outside a scan", device.identifier);
            return None;
        };

        match self.registry.offer(device) {
            Offer::Added(info) => {
                if scan.stop_on_first && !scan.matched {
                    debug!("Scan {} matched {}, delivering early", scan.id, info);
                    scan.deliver_now.notify_one();
                }
                scan.matched = true;
                Some(info)
            }
            Offer::Duplicate | Offer::Filtered => None,
        }
    }

    /// Detach notification. Removes the device from the live map, whether
    /// or not a scan is running.
    pub fn on_device_detached(&self, identifier: &str) -> bool {
        self.registry.remove(identifier).is_some()
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        lock_active(&self.active).is_some()
    }

    /// Close the running scan, if any, delivering its result now.
    pub fn stop(&self) {
        if let Some(scan) = lock_active(&self.active).as_ref() {
            scan.deliver_now.notify_one();
        }
    }
}

async fn deliver_after<F>(
    id: u64,
    timeout: Duration,
    deliver_now: Arc<Notify>,
    superseded: SupersededSlot,
    active: ActiveSlot,
    registry: Arc<DeviceRegistry>,
    on_result: F,
) where
    F: FnOnce(Vec<DeviceInfo>) + Send + 'static,
{
    tokio::select! {
        _ = tokio::time::sleep(timeout) => debug!("Scan {} window elapsed", id),
        _ = deliver_now.notified() => debug!("Scan {} closed early", id),
    }

    // A new scan clears the registry under the active lock.
    let devices = {
        let mut active = lock_active(&active);
        if active.as_ref().is_some_and(|scan| scan.id == id) {
            *active = None;
        }
        lock_superseded(&superseded)
            .take()
            .unwrap_or_else(|| registry.snapshot())
    };

    info!("Scan {} finished with {} device(s)", id, devices.len());
    on_result(devices);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockTransport, MockTransportHandle};
    use cardbridge_core::{DeviceFilter, DeviceKey, TransportKind};
    use std::sync::atomic::AtomicUsize;

    const ALLOWED: DeviceKey = DeviceKey::new(0x04E6, 0x5173);
    const OTHER: DeviceKey = DeviceKey::new(0x072F, 0x90CC);

    fn device(id: &str, key: DeviceKey) -> DeviceHandle {
        DeviceHandle::new(id, "Reader", key, TransportKind::Usb)
    }

    fn coordinator() -> (ScanCoordinator, MockTransportHandle) {
        let (transport, handle, _events) = MockTransport::new();
        let registry = Arc::new(DeviceRegistry::new(DeviceFilter::from_keys([ALLOWED])));
        (ScanCoordinator::new(registry, Arc::new(transport)), handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_includes_present_devices() {
        let (scanner, handle) = coordinator();
        handle.add_device(device("usb-1", ALLOWED));
        handle.add_device(device("usb-2", OTHER));

        let devices = scanner.scan(Duration::from_secs(2), false).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].identifier(), "usb-1");
        assert!(!scanner.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_on_first_with_present_device_delivers_immediately() {
        let (scanner, handle) = coordinator();
        handle.add_device(device("usb-1", ALLOWED));

        let started = tokio::time::Instant::now();
        let devices = scanner.scan(Duration::from_secs(60), true).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_outside_scan_is_ignored() {
        let (scanner, _handle) = coordinator();
        assert_eq!(scanner.on_device_attached(device("usb-1", ALLOWED)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_early_delivery_calls_back_once() {
        let (scanner, _handle) = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let scan = scanner
            .scan_devices(Duration::from_secs(5), true, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        scanner.on_device_attached(device("usb-1", ALLOWED));
        scanner.on_device_attached(device("usb-2", ALLOWED));
        scan.stop();
        scanner.stop();
        scan.finished().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_scan_closes_previous_one() {
        let (scanner, _handle) = coordinator();
        let (tx, rx) = oneshot::channel();

        let first = scanner
            .scan_devices(Duration::from_secs(60), false, move |devices| {
                let _ = tx.send(devices);
            })
            .unwrap();
        let second = scanner
            .scan_devices(Duration::from_secs(60), false, |_| {})
            .unwrap();

        let started = tokio::time::Instant::now();
        rx.await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(scanner.is_scanning());
        assert_ne!(first.id(), second.id());

        second.stop();
        second.finished().await;
        assert!(!scanner.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_scan_delivers_its_own_devices() {
        let (scanner, handle) = coordinator();
        handle.add_device(device("usb-1", ALLOWED));

        let (first_tx, first_rx) = oneshot::channel();
        scanner
            .scan_devices(Duration::from_secs(60), false, move |devices| {
                let _ = first_tx.send(devices);
            })
            .unwrap();
        scanner.on_device_attached(device("usb-2", ALLOWED));

        handle.detach("usb-1");
        handle.add_device(device("usb-3", ALLOWED));
        let (second_tx, second_rx) = oneshot::channel();
        let second = scanner
            .scan_devices(Duration::from_secs(60), false, move |devices| {
                let _ = second_tx.send(devices);
            })
            .unwrap();

        let first: Vec<String> = first_rx
            .await
            .unwrap()
            .iter()
            .map(|info| info.identifier().to_string())
            .collect();
        assert_eq!(first.len(), 2);
        assert!(first.contains(&"usb-1".to_string()));
        assert!(first.contains(&"usb-2".to_string()));

        second.stop();
        let second_devices = second_rx.await.unwrap();
        assert_eq!(second_devices.len(), 1);
        assert_eq!(second_devices[0].identifier(), "usb-3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_removes_from_live_map() {
        let (scanner, handle) = coordinator();
        handle.add_device(device("usb-1", ALLOWED));

        let (tx, rx) = oneshot::channel();
        let scan = scanner
            .scan_devices(Duration::from_secs(1), false, move |devices| {
                let _ = tx.send(devices);
            })
            .unwrap();
        assert!(scanner.on_device_detached("usb-1"));
        assert!(!scanner.on_device_detached("usb-1"));
        scan.finished().await;

        assert!(rx.await.unwrap().is_empty());
    }
}
