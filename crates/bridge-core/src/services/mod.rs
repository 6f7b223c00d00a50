//! Routing and broadcast services built on the session and the directory

pub mod alert_format;
pub mod broadcast;
pub mod router;

pub use alert_format::{format_alert, format_currency, format_number};
pub use broadcast::BroadcastEngine;
pub use router::{IgnoreReason, MessageRouter, RouteOutcome};
