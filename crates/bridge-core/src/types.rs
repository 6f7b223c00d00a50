//! Message and request types flowing through the bridge

use bridge_types::{FlowiseCallback, N8nCallback, Recipient};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A chat message received from the network, already filtered and normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Digits-only sender address
    pub sender_address: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// Who sent the message, as handed to the workflow engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderContext {
    pub recipient_id: Option<Uuid>,
    pub name: String,
    pub address: String,
    pub email: String,
}

impl SenderContext {
    /// Context for a sender the directory does not know
    pub fn anonymous(address: &str) -> Self {
        Self {
            recipient_id: None,
            name: String::new(),
            address: address.to_string(),
            email: String::new(),
        }
    }
}

impl From<&Recipient> for SenderContext {
    fn from(recipient: &Recipient) -> Self {
        Self {
            recipient_id: Some(recipient.id),
            name: recipient.name.clone(),
            address: recipient.address.clone(),
            email: recipient.email.clone(),
        }
    }
}

/// Correlates a forwarded message with the callback the engine sends later
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an ID echoed back by an engine; engines may not preserve UUID shape
    pub fn from_string(s: &str) -> Self {
        Self(s.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One user message on its way to a workflow engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub correlation_id: CorrelationId,
    pub recipient_address: String,
    pub sender_context: SenderContext,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

impl OutboundRequest {
    /// `recipient_address` is where the eventual reply goes, i.e. the sender
    pub fn new(
        recipient_address: impl Into<String>,
        sender_context: SenderContext,
        text: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            recipient_address: recipient_address.into(),
            sender_context,
            text: text.into(),
            sent_at: Utc::now(),
        }
    }
}

/// Engine-neutral reply posted back by a workflow engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowCallback {
    pub recipient_address: String,
    pub reply_text: String,
    pub success: bool,
    pub error_detail: Option<String>,
    pub correlation_id: Option<CorrelationId>,
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

impl From<N8nCallback> for WorkflowCallback {
    fn from(callback: N8nCallback) -> Self {
        Self {
            recipient_address: callback.phone,
            reply_text: callback.response,
            success: callback.success,
            error_detail: non_empty(callback.error),
            correlation_id: non_empty(callback.message_id).map(|id| CorrelationId::from_string(&id)),
        }
    }
}

impl From<FlowiseCallback> for WorkflowCallback {
    fn from(callback: FlowiseCallback) -> Self {
        // Flowise echoes the session id we sent; older flows only return chat_id
        let correlation = non_empty(callback.message_id).or_else(|| non_empty(callback.chat_id));

        Self {
            recipient_address: callback.phone,
            reply_text: callback.text,
            success: callback.success,
            error_detail: non_empty(callback.error),
            correlation_id: correlation.map(|id| CorrelationId::from_string(&id)),
        }
    }
}

/// Opaque credential that lets the transport resume a paired session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: String,
    #[serde(default)]
    pub secret: serde_json::Value,
    pub paired_at: DateTime<Utc>,
}
