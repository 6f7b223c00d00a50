//! The messaging network as seen by the session manager

use super::address::ChatAddress;
use super::payload::RawMessage;
use crate::error::Result;
use crate::types::DeviceIdentity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// How a connect attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The stored identity was accepted; the session is live
    Resumed,
    /// No usable identity; a pairing code must be confirmed on the phone
    PairingRequired,
}

/// A raw inbound message before filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawInbound {
    /// Full `user[:device]@server` address of the sender
    pub from: String,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub message: RawMessage,
    pub timestamp: DateTime<Utc>,
}

/// Events pushed by the transport after `connect`
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A new pairing code replaces the previous one
    PairingCode(String),
    /// The phone confirmed pairing; the identity should be persisted
    Paired(DeviceIdentity),
    Connected,
    Disconnected { reason: String },
    /// The device was removed remotely
    LoggedOut,
    Message(RawInbound),
}

/// Opaque messaging capability. Exactly one session manager owns an instance.
#[async_trait]
pub trait MessagingTransport: Send + Sync {
    /// Open the network session, resuming with `identity` when given.
    /// Events for the rest of the session are pushed into `events`.
    async fn connect(
        &self,
        identity: Option<&DeviceIdentity>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<ConnectOutcome>;

    /// Current pairing code for an unpaired session
    async fn pairing_code(&self) -> Result<String>;

    /// Submit one text message; returns once the network acknowledges it
    async fn send_text(&self, to: &ChatAddress, text: &str) -> Result<()>;

    /// Tear down the network session; the device stays paired
    async fn disconnect(&self) -> Result<()>;

    /// Remove the paired device from the account
    async fn logout(&self) -> Result<()>;
}
