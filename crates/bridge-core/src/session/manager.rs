//! Session manager: owns the single network session and its lifecycle
//!
//! The manager drives the transport through `Disconnected`, `AwaitingPairing`
//! and `Connected`, persists the paired identity, and fans inbound messages out
//! to subscribers from one event pump task. Lifecycle calls (`start`, `stop`,
//! `logout`) are serialized by one async mutex, sends by another.

use super::address::{normalize_address, ChatAddress};
use super::device_store::DeviceStore;
use super::state::{SessionState, SessionStatus};
use super::transport::{ConnectOutcome, MessagingTransport, RawInbound, TransportEvent};
use crate::config::SessionConfig;
use crate::error::{BridgeError, Result};
use crate::types::InboundMessage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

/// Anything that can deliver a text message to a recipient address
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, address: &str, text: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct SessionInner {
    state: SessionState,
    pairing_code: Option<String>,
    connected_since: Option<DateTime<Utc>>,
}

/// State shared between the manager and its event pump
#[derive(Default)]
struct Shared {
    inner: RwLock<SessionInner>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<InboundMessage>>>,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<InboundMessage>>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> SessionState {
        self.read().state
    }

    /// Apply a lifecycle edge. Edges the state machine does not allow are rejected.
    fn transition(&self, next: SessionState) -> bool {
        let mut inner = self.write();
        let current = inner.state;

        if !current.can_transition_to(next) {
            log::warn!("Rejected session transition {} -> {}", current, next);
            return false;
        }

        inner.state = next;
        match next {
            SessionState::Connected => {
                inner.pairing_code = None;
                inner.connected_since = Some(Utc::now());
            }
            SessionState::AwaitingPairing => {
                inner.connected_since = None;
            }
            SessionState::Disconnected => {
                inner.pairing_code = None;
                inner.connected_since = None;
            }
        }

        log::info!("Session state {} -> {}", current, next);
        true
    }

    /// Move to `Disconnected` unless already there
    fn mark_disconnected(&self) {
        if self.state() != SessionState::Disconnected {
            self.transition(SessionState::Disconnected);
        }
    }

    fn set_pairing_code(&self, code: String) {
        let mut inner = self.write();
        if inner.state == SessionState::AwaitingPairing {
            inner.pairing_code = Some(code);
        } else {
            log::debug!("Ignoring pairing code while {}", inner.state);
        }
    }

    fn dispatch(&self, message: InboundMessage) {
        let mut listeners = self.listeners();
        listeners.retain(|listener| listener.send(message.clone()).is_ok());
    }

    fn close_listeners(&self) {
        let mut listeners = self.listeners();
        if !listeners.is_empty() {
            log::debug!("Closing {} inbound stream(s)", listeners.len());
        }
        listeners.clear();
    }
}

/// A running event pump and the token that stops it
struct Lifecycle {
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

impl Lifecycle {
    async fn shutdown(self, limit: Duration) {
        self.cancel.cancel();

        let mut pump = self.pump;
        if timeout(limit, &mut pump).await.is_err() {
            log::warn!("Event pump did not stop within {:?}, aborting it", limit);
            pump.abort();
        }
    }
}

/// Consumes transport events for one connected (or pairing) session
struct EventPump {
    shared: Arc<Shared>,
    transport: Arc<dyn MessagingTransport>,
    device_store: Arc<dyn DeviceStore>,
    cancel: CancellationToken,
    pairing_deadline: Option<Instant>,
    stop_timeout: Duration,
}

impl EventPump {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        loop {
            let deadline = self.pairing_deadline;

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    log::debug!("Session event pump cancelled");
                    break;
                }
                _ = pairing_expiry(deadline) => {
                    self.pairing_deadline = None;
                    if self.shared.state() == SessionState::AwaitingPairing {
                        log::warn!("Pairing was not confirmed in time, tearing the session down");
                        self.disconnect_transport().await;
                        self.shared.mark_disconnected();
                        break;
                    }
                }
                event = events.recv() => match event {
                    Some(event) => {
                        if !self.handle(event).await {
                            break;
                        }
                    }
                    None => {
                        log::warn!("Transport closed its event channel");
                        self.shared.mark_disconnected();
                        break;
                    }
                },
            }
        }
    }

    /// Returns false once the session is over
    async fn handle(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::PairingCode(code) => {
                log::info!("Pairing code refreshed");
                self.shared.set_pairing_code(code);
                true
            }
            TransportEvent::Paired(identity) => {
                if let Err(e) = self.device_store.save(&identity) {
                    log::error!("Failed to persist device identity {}: {}", identity.device_id, e);
                }
                self.pairing_deadline = None;
                if self.shared.state() != SessionState::Connected {
                    self.shared.transition(SessionState::Connected);
                }
                log::info!("Device {} paired", identity.device_id);
                true
            }
            TransportEvent::Connected => {
                self.pairing_deadline = None;
                if self.shared.state() != SessionState::Connected {
                    self.shared.transition(SessionState::Connected);
                }
                true
            }
            TransportEvent::Disconnected { reason } => {
                log::warn!("Session disconnected: {}", reason);
                self.shared.mark_disconnected();
                false
            }
            TransportEvent::LoggedOut => {
                log::warn!("Device was logged out remotely");
                if let Err(e) = self.device_store.clear() {
                    log::error!("Failed to clear device identity: {}", e);
                }
                self.shared.mark_disconnected();
                false
            }
            TransportEvent::Message(raw) => {
                self.deliver(raw);
                true
            }
        }
    }

    fn deliver(&self, raw: RawInbound) {
        if raw.from_me {
            return;
        }

        let Some(address) = ChatAddress::parse(&raw.from) else {
            log::debug!("Dropping message from unparseable address '{}'", raw.from);
            return;
        };

        if !address.is_user() {
            log::debug!("Dropping message from non-user chat {}", address);
            return;
        }

        let payload = raw.message.into_payload();
        let text = payload.text();
        if text.trim().is_empty() {
            log::debug!("Dropping message without text from {}", address);
            return;
        }

        let sender_address = match normalize_address(&address.user) {
            Ok(sender_address) => sender_address,
            Err(e) => {
                log::debug!("Dropping message: {}", e);
                return;
            }
        };

        self.shared.dispatch(InboundMessage {
            sender_address,
            text: text.to_string(),
            received_at: raw.timestamp,
        });
    }

    async fn disconnect_transport(&self) {
        match timeout(self.stop_timeout, self.transport.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Transport disconnect failed: {}", e),
            Err(_) => log::warn!("Transport disconnect timed out"),
        }
    }
}

async fn pairing_expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Owner of the single messaging session
pub struct SessionManager {
    transport: Arc<dyn MessagingTransport>,
    device_store: Arc<dyn DeviceStore>,
    config: SessionConfig,
    shared: Arc<Shared>,
    lifecycle: tokio::sync::Mutex<Option<Lifecycle>>,
    send_lock: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn MessagingTransport>,
        device_store: Arc<dyn DeviceStore>,
        config: SessionConfig,
    ) -> Self {
        Self {
            transport,
            device_store,
            config,
            shared: Arc::new(Shared::default()),
            lifecycle: tokio::sync::Mutex::new(None),
            send_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Connect, resuming with the stored identity or starting a pairing flow.
    /// Calling this while connected or pairing is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;

        let state = self.state();
        if state != SessionState::Disconnected {
            log::debug!("Session already {}, nothing to start", state);
            return Ok(());
        }

        // The pump of a dropped session has already exited; reap it
        if let Some(previous) = lifecycle.take() {
            previous.shutdown(self.config.stop_timeout()).await;
        }

        let identity = self
            .device_store
            .load()
            .map_err(|e| BridgeError::SessionStart(format!("Failed to load device identity: {}", e)))?;

        log::info!(
            "Starting session ({})",
            if identity.is_some() { "resuming stored device" } else { "no stored device" }
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connect_timeout = self.config.connect_timeout();

        let outcome = match timeout(connect_timeout, self.transport.connect(identity.as_ref(), events_tx)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => return Err(BridgeError::SessionStart(e.to_string())),
            Err(_) => {
                return Err(BridgeError::SessionStart(format!(
                    "transport did not answer within {}s",
                    connect_timeout.as_secs()
                )))
            }
        };

        let pairing_deadline = match outcome {
            ConnectOutcome::Resumed => {
                self.shared.transition(SessionState::Connected);
                None
            }
            ConnectOutcome::PairingRequired => {
                let code = match timeout(connect_timeout, self.transport.pairing_code()).await {
                    Ok(Ok(code)) => code,
                    Ok(Err(e)) => {
                        self.disconnect_transport().await;
                        return Err(BridgeError::SessionStart(format!(
                            "Failed to obtain pairing code: {}",
                            e
                        )));
                    }
                    Err(_) => {
                        self.disconnect_transport().await;
                        return Err(BridgeError::SessionStart(
                            "Timed out waiting for pairing code".to_string(),
                        ));
                    }
                };

                self.shared.transition(SessionState::AwaitingPairing);
                self.shared.set_pairing_code(code);
                log::info!("Session awaiting pairing");

                // A zero window means the code never expires
                match self.config.pairing_timeout_secs {
                    0 => None,
                    _ => Some(Instant::now() + self.config.pairing_timeout()),
                }
            }
        };

        let cancel = CancellationToken::new();
        let pump = EventPump {
            shared: Arc::clone(&self.shared),
            transport: Arc::clone(&self.transport),
            device_store: Arc::clone(&self.device_store),
            cancel: cancel.clone(),
            pairing_deadline,
            stop_timeout: self.config.stop_timeout(),
        };

        *lifecycle = Some(Lifecycle {
            cancel,
            pump: tokio::spawn(pump.run(events_rx)),
        });

        Ok(())
    }

    /// Tear the session down and end every inbound stream. Never fails.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;

        if let Some(running) = lifecycle.take() {
            running.shutdown(self.config.stop_timeout()).await;
        }

        if self.state() != SessionState::Disconnected {
            self.disconnect_transport().await;
            self.shared.mark_disconnected();
        }

        self.shared.close_listeners();
        log::info!("Session stopped");
        Ok(())
    }

    /// Remove the paired device and forget the stored identity
    pub async fn logout(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;

        if self.state() != SessionState::Connected {
            return Err(BridgeError::Logout("session is not connected".to_string()));
        }

        let limit = self.config.stop_timeout();
        match timeout(limit, self.transport.logout()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(BridgeError::Logout(e.to_string())),
            Err(_) => {
                return Err(BridgeError::Logout(format!(
                    "no answer within {}s",
                    limit.as_secs()
                )))
            }
        }

        if let Some(running) = lifecycle.take() {
            running.shutdown(limit).await;
        }

        self.device_store
            .clear()
            .map_err(|e| BridgeError::Logout(format!("Failed to clear device identity: {}", e)))?;

        self.shared.mark_disconnected();
        log::info!("Logged out, device identity removed");
        Ok(())
    }

    /// Current pairing code; only available while awaiting pairing
    pub fn pairing_code(&self) -> Result<String> {
        let inner = self.shared.read();

        if inner.state == SessionState::Connected {
            return Err(BridgeError::NotAvailable(
                "session is already connected".to_string(),
            ));
        }

        inner
            .pairing_code
            .clone()
            .ok_or_else(|| BridgeError::NotAvailable("no pairing code has been issued".to_string()))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn status(&self) -> SessionStatus {
        let inner = self.shared.read();
        SessionStatus {
            state: inner.state,
            connected: inner.state == SessionState::Connected,
            pairing_code: inner.pairing_code.clone(),
            connected_since: inner.connected_since,
        }
    }

    /// Stream of inbound messages. Ends when the session is stopped.
    pub fn subscribe(&self) -> UnboundedReceiverStream<InboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.listeners().push(tx);
        UnboundedReceiverStream::new(rx)
    }

    /// Send a text message within the configured send timeout
    pub async fn send_message(&self, address: &str, text: &str) -> Result<()> {
        self.send_message_within(address, text, self.config.send_timeout()).await
    }

    /// Send a text message, giving up after `limit`
    pub async fn send_message_within(&self, address: &str, text: &str, limit: Duration) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }

        let to = ChatAddress::from_phone(address)?;

        let submit = async {
            let _guard = self.send_lock.lock().await;
            // The session may have gone away while this send was queued
            if !self.is_connected() {
                return Err(BridgeError::NotConnected);
            }
            self.transport.send_text(&to, text).await
        };

        match timeout(limit, submit).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BridgeError::Timeout(format!(
                    "send to {} did not complete within {}ms",
                    to,
                    limit.as_millis()
                )))
            }
        }

        log::debug!("Sent message to {}", to);
        Ok(())
    }

    async fn disconnect_transport(&self) {
        match timeout(self.config.stop_timeout(), self.transport.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Transport disconnect failed: {}", e),
            Err(_) => log::warn!("Transport disconnect timed out"),
        }
    }
}

#[async_trait]
impl MessageSender for SessionManager {
    async fn send_message(&self, address: &str, text: &str) -> Result<()> {
        SessionManager::send_message(self, address, text).await
    }
}
