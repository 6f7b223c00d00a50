//! Clients for external services

pub mod flowise;
pub mod gateway;
pub mod n8n;

use crate::error::Result;
use crate::types::{OutboundRequest, SenderContext};
use async_trait::async_trait;
use bridge_types::WorkflowVariant;
use serde_json::{json, Value};

pub use flowise::FlowiseClient;
pub use gateway::GatewayTransport;
pub use n8n::N8nClient;

/// A workflow engine that accepts user messages and replies later through a callback
#[async_trait]
pub trait WorkflowClient: Send + Sync {
    fn variant(&self) -> WorkflowVariant;

    /// Hand the message to the engine. Success means the engine accepted it,
    /// not that a reply exists yet.
    async fn forward(&self, request: &OutboundRequest) -> Result<()>;
}

/// Sender context in the shape both engines expect
pub(crate) fn user_context_json(context: &SenderContext) -> Value {
    json!({
        "user_id": context.recipient_id.map(|id| id.to_string()).unwrap_or_default(),
        "name": context.name,
        "phone": context.address,
        "email": context.email,
    })
}
