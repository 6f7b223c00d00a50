//! Chat Bridge Core Library
//!
//! Session lifecycle, message routing to workflow engines, and trading alert
//! broadcast for the chat bridge.

pub mod clients;
pub mod config;
pub mod directory;
pub mod error;
pub mod services;
pub mod session;
pub mod types;

// Re-export main types for easy access
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};

pub use clients::{FlowiseClient, GatewayTransport, N8nClient, WorkflowClient};
pub use directory::{JsonDirectory, RecipientDirectory, WorkflowConfigSource};
pub use services::{BroadcastEngine, MessageRouter, RouteOutcome};
pub use session::{
    DeviceStore, FileDeviceStore, MemoryDeviceStore, MessageSender, MessagingTransport,
    SessionManager, SessionState, SessionStatus,
};
pub use types::{
    CorrelationId, DeviceIdentity, InboundMessage, OutboundRequest, SenderContext,
    WorkflowCallback,
};
