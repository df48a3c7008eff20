//! Per-reader runtime state and the operations the host framework calls.
//!
//! A [`ReaderSession`] sits between two execution contexts:
//!
//! ```text
//!   caller task                         transport driver
//!   ───────────                         ────────────────
//!   open_physical_channel ──► card_connect
//!        (suspends)                          │
//!                     ◄── channel_opened ◄── on_card_connected
//!   transmit_apdu ─────────► transmit
//!        (suspends)                          │
//!                     ◄── response_ready ◄── on_card_response_received
//!                     ◄── response_ready ◄── on_card_presence_change(false)
//!                                        ◄── on_reader_or_card_error
//!   wait_for_card_*
//!        (suspends)   ◄── presence_changed ◄ on_card_presence_change
//! ```
//!
//! All shared fields live in one mutex-guarded [`SessionState`]. Handlers
//! write state first and signal second; waiters arm their [`Notify`]
//! registration before reading state, so a notification delivered between
//! the read and the suspension is never lost, and they re-test their own
//! condition after every wake.

use crate::error::{ReaderError, Result};
use crate::transport::CardTransport;
use cardbridge_core::{SessionTimeouts, bytes_to_hex};
use std::fmt;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Pending response of the in-flight transmit.
#[derive(Debug, Default)]
enum ResponseSlot {
    /// No transmit in flight.
    #[default]
    Idle,

    /// Command sent, nothing received yet.
    Awaiting,

    /// Response stored by the notification side, not yet consumed.
    Received(Vec<u8>),

    /// Card removed or reader failed while the transmit was in flight.
    Aborted,
}

#[derive(Debug, Default)]
struct SessionState {
    contactless: bool,
    card_present: bool,
    channel_open: bool,
    response: ResponseSlot,
    insertion_cancelled: bool,
    removal_cancelled: bool,
    detached: bool,
}

/// Runtime state of one physical reader.
///
/// Shared as `Arc<ReaderSession>` between the task calling the operations and
/// the context delivering transport notifications. At most one operation of
/// each kind is expected in flight per session; the host framework serializes
/// calls against a reader.
pub struct ReaderSession {
    name: String,
    transport: Arc<dyn CardTransport>,
    timeouts: SessionTimeouts,
    state: Mutex<SessionState>,
    channel_opened: Notify,
    response_ready: Notify,
    presence_changed: Notify,
}

impl fmt::Debug for ReaderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderSession")
            .field("name", &self.name)
            .field("timeouts", &self.timeouts)
            .field("state", &*self.state())
            .finish_non_exhaustive()
    }
}

impl ReaderSession {
    /// Bind a session to the reader `name` of `transport`.
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn CardTransport>,
        timeouts: SessionTimeouts,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            timeouts,
            state: Mutex::new(SessionState::default()),
            channel_opened: Notify::new(),
            response_ready: Notify::new(),
            presence_changed: Notify::new(),
        }
    }

    /// Stable reader identity, as used in transport card events.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn timeouts(&self) -> SessionTimeouts {
        self.timeouts
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Suspend until `check` yields a value, re-testing after every wake of `signal`.
    async fn wait_until<T>(
        &self,
        signal: &Notify,
        mut check: impl FnMut(&mut SessionState) -> Option<T>,
    ) -> T {
        loop {
            let mut notified = pin!(signal.notified());
            notified.as_mut().enable();

            let outcome = check(&mut self.state());
            if let Some(value) = outcome {
                return value;
            }

            notified.await;
        }
    }

    // ------------------------------------------------------------------
    // Operations (caller context)
    // ------------------------------------------------------------------

    /// Power up the card and wait for the transport to confirm.
    ///
    /// # Errors
    ///
    /// - `ReaderIo` if the transport refuses the request.
    /// - `ChannelOpenTimeout` if no card-connected notification arrives
    ///   within the configured timeout.
    pub async fn open_physical_channel(&self) -> Result<()> {
        if self.state().channel_open {
            debug!("Physical channel already open on {}", self.name);
            return Ok(());
        }

        self.transport.card_connect(&self.name).map_err(|e| {
            ReaderError::reader_io(format!("card connect failed on {}: {}", self.name, e))
        })?;

        let opened = self.wait_until(&self.channel_opened, |state| {
            state.channel_open.then_some(())
        });

        match tokio::time::timeout(self.timeouts.channel_open, opened).await {
            Ok(()) => {
                info!("Physical channel open on {}", self.name);
                Ok(())
            }
            Err(_) => {
                let duration_ms = millis(self.timeouts.channel_open);
                warn!(
                    "No card connection on {} after {}ms",
                    self.name, duration_ms
                );
                Err(ReaderError::channel_open_timeout(&self.name, duration_ms))
            }
        }
    }

    /// Ask the transport to power down the card.
    ///
    /// Best effort: the request is not confirmed and the session considers
    /// the channel closed as soon as the request is issued.
    pub fn close_physical_channel(&self) -> Result<()> {
        self.state().channel_open = false;

        self.transport.disconnect(&self.name).map_err(|e| {
            ReaderError::reader_io(format!("disconnect failed on {}: {}", self.name, e))
        })?;

        debug!("Physical channel close requested on {}", self.name);
        Ok(())
    }

    /// Transport-reported connection flag.
    #[must_use]
    pub fn is_physical_channel_open(&self) -> bool {
        self.transport.is_connected(&self.name)
    }

    /// Poll the transport's card flag and refresh the session with it.
    ///
    /// Presence waiters are woken when the polled value differs from the one
    /// last delivered by notifications.
    pub fn check_card_presence(&self) -> bool {
        let present = self.transport.is_card_present(&self.name);

        let changed = {
            let mut state = self.state();
            let changed = state.card_present != present;
            state.card_present = present;
            changed
        };

        if changed {
            self.presence_changed.notify_waiters();
        }
        present
    }

    /// Answer-to-reset of the current card as upper-case hex.
    pub fn power_on_data(&self) -> Result<String> {
        self.transport
            .power_on_data(&self.name)
            .map(|atr| bytes_to_hex(&atr))
            .ok_or_else(|| ReaderError::reader_io(format!("no ATR available on {}", self.name)))
    }

    /// Send an APDU and wait for its response.
    ///
    /// # Errors
    ///
    /// - `ReaderIo` for an empty command, a closed channel or a transport
    ///   refusal. No transport call is made for an empty command.
    /// - `CardCommunication` when no response is available after the wait:
    ///   timeout, card removed mid-transmission, reader error notification or
    ///   an empty response.
    pub async fn transmit_apdu(&self, command: &[u8]) -> Result<Vec<u8>> {
        if command.is_empty() {
            return Err(ReaderError::reader_io("APDU command must not be empty"));
        }

        {
            let mut state = self.state();
            if !state.channel_open {
                return Err(ReaderError::reader_io(format!(
                    "physical channel is not open on {}",
                    self.name
                )));
            }
            state.response = ResponseSlot::Awaiting;
        }

        debug!("APDU -> {}: {}", self.name, bytes_to_hex(command));

        if let Err(e) = self.transport.transmit(&self.name, command) {
            self.state().response = ResponseSlot::Idle;
            return Err(ReaderError::reader_io(format!(
                "transmit failed on {}: {}",
                self.name, e
            )));
        }

        let response = self.wait_until(&self.response_ready, |state| {
            match std::mem::take(&mut state.response) {
                ResponseSlot::Awaiting => {
                    state.response = ResponseSlot::Awaiting;
                    None
                }
                ResponseSlot::Received(data) => Some(data),
                ResponseSlot::Aborted | ResponseSlot::Idle => Some(Vec::new()),
            }
        });

        let response = match tokio::time::timeout(self.timeouts.transmit, response).await {
            Ok(data) => data,
            Err(_) => {
                self.state().response = ResponseSlot::Idle;
                warn!(
                    "No APDU response on {} after {}ms",
                    self.name,
                    millis(self.timeouts.transmit)
                );
                Vec::new()
            }
        };

        if response.is_empty() {
            return Err(ReaderError::card_communication("no response received"));
        }

        debug!("APDU <- {}: {}", self.name, bytes_to_hex(&response));
        Ok(response)
    }

    /// Wait until a card is present.
    ///
    /// # Errors
    ///
    /// `WaitCancelled` if [`stop_wait_for_card_insertion`] is called while
    /// waiting, or was called before the wait started and not yet consumed.
    /// Either way the request is consumed when the wait returns.
    ///
    /// [`stop_wait_for_card_insertion`]: Self::stop_wait_for_card_insertion
    pub async fn wait_for_card_insertion(&self) -> Result<()> {
        debug!("Waiting for card insertion on {}", self.name);

        let inserted = self
            .wait_until(&self.presence_changed, |state| {
                if state.card_present {
                    state.insertion_cancelled = false;
                    Some(true)
                } else if std::mem::take(&mut state.insertion_cancelled) || state.detached {
                    Some(false)
                } else {
                    None
                }
            })
            .await;

        if inserted {
            Ok(())
        } else {
            debug!("Card insertion wait cancelled on {}", self.name);
            Err(ReaderError::wait_cancelled(&self.name))
        }
    }

    /// Wait until no card is present.
    ///
    /// # Errors
    ///
    /// `WaitCancelled` if [`stop_wait_for_card_removal`] is called while
    /// waiting, or was called before the wait started and not yet consumed.
    /// Either way the request is consumed when the wait returns.
    ///
    /// [`stop_wait_for_card_removal`]: Self::stop_wait_for_card_removal
    pub async fn wait_for_card_removal(&self) -> Result<()> {
        debug!("Waiting for card removal on {}", self.name);

        let removed = self
            .wait_until(&self.presence_changed, |state| {
                if !state.card_present {
                    state.removal_cancelled = false;
                    Some(true)
                } else if std::mem::take(&mut state.removal_cancelled) {
                    Some(false)
                } else {
                    None
                }
            })
            .await;

        if removed {
            Ok(())
        } else {
            debug!("Card removal wait cancelled on {}", self.name);
            Err(ReaderError::wait_cancelled(&self.name))
        }
    }

    /// Cancel a pending [`wait_for_card_insertion`](Self::wait_for_card_insertion).
    pub fn stop_wait_for_card_insertion(&self) {
        self.state().insertion_cancelled = true;
        self.presence_changed.notify_waiters();
    }

    /// Cancel a pending [`wait_for_card_removal`](Self::wait_for_card_removal).
    pub fn stop_wait_for_card_removal(&self) {
        self.state().removal_cancelled = true;
        self.presence_changed.notify_waiters();
    }

    /// Set the contactless capability flag.
    pub fn set_contactless(&self, contactless: bool) -> &Self {
        self.state().contactless = contactless;
        self
    }

    #[must_use]
    pub fn is_contactless(&self) -> bool {
        self.state().contactless
    }

    pub fn on_start_detection(&self) {
        info!("Card detection started on {}", self.name);
    }

    pub fn on_stop_detection(&self) {
        info!("Card detection stopped on {}", self.name);
    }

    pub fn on_unregister(&self) {
        info!("Reader {} unregistered", self.name);
    }

    // ------------------------------------------------------------------
    // Notification handlers (transport context)
    // ------------------------------------------------------------------

    /// Card inserted or removed.
    ///
    /// A removal also closes the channel and aborts an in-flight transmit so
    /// the caller is released before its timeout.
    pub fn on_card_presence_change(&self, present: bool) {
        {
            let mut state = self.state();
            state.card_present = present;
            if !present {
                state.channel_open = false;
                abort_pending_response(&mut state);
            }
        }

        if present {
            info!("Card inserted in {}", self.name);
        } else {
            info!("Card removed from {}", self.name);
        }

        self.presence_changed.notify_waiters();
        if !present {
            self.response_ready.notify_waiters();
        }
    }

    /// The card confirmed the power-up.
    pub fn on_card_connected(&self) {
        self.state().channel_open = true;
        debug!("Card connected on {}", self.name);
        self.channel_opened.notify_waiters();
    }

    /// Response bytes for the in-flight transmit.
    ///
    /// Responses arriving while no transmit is armed are dropped.
    pub fn on_card_response_received(&self, data: Vec<u8>) {
        {
            let mut state = self.state();
            if !matches!(state.response, ResponseSlot::Awaiting) {
                warn!(
                    "Dropping unsolicited response on {}: {}",
                    self.name,
                    bytes_to_hex(&data)
                );
                return;
            }
            state.response = ResponseSlot::Received(data);
        }

        self.response_ready.notify_waiters();
    }

    /// Reader or card failure: release an in-flight transmit with no response.
    pub fn on_reader_or_card_error(&self) {
        abort_pending_response(&mut self.state());
        warn!("Reader or card error on {}", self.name);
        self.response_ready.notify_waiters();
    }

    /// The underlying device went away.
    ///
    /// Marks the card absent, aborts an in-flight transmit and cancels a
    /// pending insertion wait; later insertion waits fail at once. A pending
    /// removal wait completes normally.
    pub fn on_reader_detached(&self) {
        {
            let mut state = self.state();
            state.card_present = false;
            state.channel_open = false;
            state.insertion_cancelled = true;
            state.detached = true;
            abort_pending_response(&mut state);
        }

        warn!("Reader {} detached", self.name);
        self.presence_changed.notify_waiters();
        self.response_ready.notify_waiters();
    }
}

fn abort_pending_response(state: &mut SessionState) {
    if !matches!(state.response, ResponseSlot::Idle) {
        state.response = ResponseSlot::Aborted;
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockTransport, TransportCall};
    use crate::transport::DeviceHandle;
    use cardbridge_core::{DeviceKey, TransportKind};
    use std::time::Instant;

    const READER: &str = "reader-1";

    fn session_with(
        timeouts: SessionTimeouts,
    ) -> (Arc<ReaderSession>, crate::mock::MockTransportHandle) {
        let (transport, handle, _events) = MockTransport::new();
        let device = DeviceHandle::new(
            READER,
            "SCR3310",
            DeviceKey::new(0x04E6, 0x5173),
            TransportKind::Usb,
        );
        handle.add_device(device.clone());
        handle.pre_authorize(READER);
        let name = transport.create_session(&device).unwrap();
        handle.clear_calls();

        let session = Arc::new(ReaderSession::new(name, Arc::new(transport), timeouts));
        (session, handle)
    }

    fn short_timeouts() -> SessionTimeouts {
        SessionTimeouts {
            channel_open: Duration::from_millis(200),
            transmit: Duration::from_millis(200),
            authorization: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_open_channel_after_connected_notification() {
        let (session, handle) = session_with(short_timeouts());

        let notifier = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            notifier.on_card_connected();
        });

        session.open_physical_channel().await.unwrap();
        assert!(handle.calls().contains(&TransportCall::CardConnect(READER.into())));
    }

    #[tokio::test]
    async fn test_open_channel_sees_notification_delivered_before_wait() {
        let (session, _handle) = session_with(short_timeouts());

        session.on_card_connected();
        session.open_physical_channel().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_channel_timeout() {
        let (session, _handle) = session_with(short_timeouts());

        let result = session.open_physical_channel().await;
        assert!(matches!(
            result,
            Err(ReaderError::ChannelOpenTimeout { duration_ms: 200, .. })
        ));
    }

    #[tokio::test]
    async fn test_transmit_requires_open_channel() {
        let (session, handle) = session_with(short_timeouts());

        let result = session.transmit_apdu(&[0x00, 0xA4, 0x04, 0x00]).await;
        assert!(matches!(result, Err(ReaderError::ReaderIo { .. })));
        assert!(handle.calls().is_empty());
    }

    #[tokio::test]
    async fn test_transmit_empty_command_makes_no_transport_call() {
        let (session, handle) = session_with(short_timeouts());
        session.on_card_connected();

        let result = session.transmit_apdu(&[]).await;
        assert!(matches!(result, Err(ReaderError::ReaderIo { .. })));
        assert!(handle.calls().is_empty());
    }

    #[tokio::test]
    async fn test_transmit_returns_response() {
        let (session, handle) = session_with(short_timeouts());
        session.on_card_connected();

        let notifier = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            notifier.on_card_response_received(vec![0x90, 0x00]);
        });

        let response = session.transmit_apdu(&[0x00, 0xB0, 0x00, 0x00]).await.unwrap();
        assert_eq!(response, vec![0x90, 0x00]);
        assert!(handle.calls().contains(&TransportCall::Transmit {
            reader: READER.into(),
            apdu: vec![0x00, 0xB0, 0x00, 0x00],
        }));
    }

    #[tokio::test]
    async fn test_transmit_refused_by_transport_is_reader_io() {
        let (session, handle) = session_with(short_timeouts());
        session.on_card_connected();
        handle.set_fail_writes(true);

        let result = session.transmit_apdu(&[0x00, 0xB0, 0x00, 0x00]).await;
        assert!(matches!(result, Err(ReaderError::ReaderIo { .. })));

        // The slot was released: a later response is unsolicited.
        handle.set_fail_writes(false);
        session.on_card_response_received(vec![0x6A, 0x82]);
        let notifier = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            notifier.on_card_response_received(vec![0x90, 0x00]);
        });
        let response = session.transmit_apdu(&[0x00, 0xB0, 0x00, 0x00]).await.unwrap();
        assert_eq!(response, vec![0x90, 0x00]);
    }

    #[tokio::test]
    async fn test_transmit_timeout_is_card_communication_error() {
        let (session, _handle) = session_with(short_timeouts());
        session.on_card_connected();

        let result = session.transmit_apdu(&[0x00, 0xB0, 0x00, 0x00]).await;
        assert!(matches!(result, Err(ReaderError::CardCommunication { .. })));
    }

    #[tokio::test]
    async fn test_reader_error_unblocks_transmit() {
        let (session, _handle) = session_with(SessionTimeouts::default());
        session.on_card_connected();

        let notifier = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            notifier.on_reader_or_card_error();
        });

        let started = Instant::now();
        let result = session.transmit_apdu(&[0x00, 0xB0, 0x00, 0x00]).await;
        assert!(matches!(result, Err(ReaderError::CardCommunication { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unsolicited_response_is_dropped() {
        let (session, _handle) = session_with(short_timeouts());
        session.on_card_connected();
        session.on_card_response_received(vec![0x6A, 0x82]);

        let result = session.transmit_apdu(&[0x00, 0xB0, 0x00, 0x00]).await;
        assert!(matches!(result, Err(ReaderError::CardCommunication { .. })));
    }

    #[tokio::test]
    async fn test_empty_response_is_failure() {
        let (session, _handle) = session_with(short_timeouts());
        session.on_card_connected();

        let notifier = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            notifier.on_card_response_received(Vec::new());
        });

        let result = session.transmit_apdu(&[0x00, 0xB0, 0x00, 0x00]).await;
        assert!(matches!(result, Err(ReaderError::CardCommunication { .. })));
    }

    #[tokio::test]
    async fn test_card_removal_closes_channel() {
        let (session, _handle) = session_with(short_timeouts());
        session.on_card_connected();
        session.on_card_presence_change(false);

        let result = session.transmit_apdu(&[0x00]).await;
        assert!(matches!(result, Err(ReaderError::ReaderIo { .. })));
    }

    #[tokio::test]
    async fn test_wait_for_insertion_returns_immediately_when_present() {
        let (session, _handle) = session_with(short_timeouts());
        session.on_card_presence_change(true);
        session.wait_for_card_insertion().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_insertion_ignores_unrelated_wakes() {
        let (session, _handle) = session_with(short_timeouts());

        let notifier = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            notifier.on_card_presence_change(false);
            tokio::time::sleep(Duration::from_millis(10)).await;
            notifier.stop_wait_for_card_removal();
            tokio::time::sleep(Duration::from_millis(10)).await;
            notifier.on_card_presence_change(true);
        });

        session.wait_for_card_insertion().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_wait_for_insertion_cancels() {
        let (session, _handle) = session_with(short_timeouts());

        let notifier = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            notifier.stop_wait_for_card_insertion();
        });

        let result = session.wait_for_card_insertion().await;
        assert!(matches!(result, Err(ReaderError::WaitCancelled { .. })));
    }

    #[tokio::test]
    async fn test_stop_before_wait_still_cancels() {
        let (session, _handle) = session_with(short_timeouts());

        session.stop_wait_for_card_insertion();
        let result = session.wait_for_card_insertion().await;
        assert!(matches!(result, Err(ReaderError::WaitCancelled { .. })));

        session.on_card_presence_change(true);
        session.stop_wait_for_card_removal();
        let result = session.wait_for_card_removal().await;
        assert!(matches!(result, Err(ReaderError::WaitCancelled { .. })));
    }

    #[tokio::test]
    async fn test_stop_request_is_consumed_by_one_wait() {
        let (session, _handle) = session_with(short_timeouts());
        session.stop_wait_for_card_insertion();
        assert!(session.wait_for_card_insertion().await.is_err());

        let notifier = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            notifier.on_card_presence_change(true);
        });
        session.wait_for_card_insertion().await.unwrap();

        // A stop that finds the card already present is dropped with the wait.
        session.stop_wait_for_card_insertion();
        session.wait_for_card_insertion().await.unwrap();
        session.on_card_presence_change(false);

        let notifier = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            notifier.on_card_presence_change(true);
        });
        session.wait_for_card_insertion().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_removal_and_stop() {
        let (session, _handle) = session_with(short_timeouts());
        session.on_card_presence_change(true);

        let notifier = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            notifier.stop_wait_for_card_removal();
        });
        let result = session.wait_for_card_removal().await;
        assert!(matches!(result, Err(ReaderError::WaitCancelled { .. })));

        let notifier = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            notifier.on_card_presence_change(false);
        });
        session.wait_for_card_removal().await.unwrap();
    }

    #[tokio::test]
    async fn test_detach_cancels_insertion_wait() {
        let (session, _handle) = session_with(short_timeouts());

        let notifier = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            notifier.on_reader_detached();
        });

        let result = session.wait_for_card_insertion().await;
        assert!(matches!(result, Err(ReaderError::WaitCancelled { .. })));

        let result = session.wait_for_card_insertion().await;
        assert!(matches!(result, Err(ReaderError::WaitCancelled { .. })));
    }

    #[tokio::test]
    async fn test_check_card_presence_polls_transport() {
        let (session, handle) = session_with(short_timeouts());
        assert!(!session.check_card_presence());

        handle.insert_card(READER, vec![0x3B, 0x00]);
        assert!(session.check_card_presence());
        session.wait_for_card_insertion().await.unwrap();
    }

    #[tokio::test]
    async fn test_power_on_data() {
        let (session, handle) = session_with(short_timeouts());
        assert!(matches!(
            session.power_on_data(),
            Err(ReaderError::ReaderIo { .. })
        ));

        handle.insert_card(READER, vec![0x3B, 0x8F, 0x80, 0x01]);
        assert_eq!(session.power_on_data().unwrap(), "3B8F8001");
    }

    #[tokio::test]
    async fn test_close_channel_is_fire_and_forget() {
        let (session, handle) = session_with(short_timeouts());
        session.on_card_connected();

        session.close_physical_channel().unwrap();
        assert!(handle.calls().contains(&TransportCall::Disconnect(READER.into())));
        assert!(!session.is_physical_channel_open());
    }

    #[test]
    fn test_set_contactless_is_fluent() {
        let (transport, _handle, _events) = MockTransport::new();
        let session = ReaderSession::new(READER, Arc::new(transport), SessionTimeouts::default());

        assert!(!session.is_contactless());
        assert!(session.set_contactless(true).is_contactless());
        assert_eq!(session.name(), READER);
    }
}
