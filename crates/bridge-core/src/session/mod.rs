//! Messaging session: lifecycle, transport seam, inbound decoding

pub mod address;
pub mod device_store;
pub mod manager;
pub mod payload;
pub mod state;
pub mod transport;

pub use address::{normalize_address, ChatAddress, DEFAULT_USER_SERVER};
pub use device_store::{DeviceStore, FileDeviceStore, MemoryDeviceStore};
pub use manager::{MessageSender, SessionManager};
pub use payload::{MessagePayload, RawMessage};
pub use state::{SessionState, SessionStatus};
pub use transport::{ConnectOutcome, MessagingTransport, RawInbound, TransportEvent};
