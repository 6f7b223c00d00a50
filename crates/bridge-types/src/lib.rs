//! Shared record types exchanged between the bridge and its collaborators
//!
//! Everything in here crosses a boundary: recipients come from the directory,
//! alerts and engine callbacks arrive as opaque JSON records, broadcast results
//! are handed back to whoever asked for the broadcast.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// The automation back end that produces conversational replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowVariant {
    N8n,
    Flowise,
}

impl WorkflowVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::N8n => "n8n",
            Self::Flowise => "flowise",
        }
    }
}

impl fmt::Display for WorkflowVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown workflow type: {0}")]
pub struct UnknownVariant(pub String);

impl FromStr for WorkflowVariant {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "n8n" => Ok(Self::N8n),
            "flowise" => Ok(Self::Flowise),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A directory entry that may chat with the bot and receive broadcasts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: Uuid,
    pub name: String,
    #[serde(alias = "phone")]
    pub address: String,
    #[serde(default)]
    pub email: String,
    #[serde(alias = "is_active")]
    pub is_eligible: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRecipientRequest {
    pub name: String,
    #[serde(alias = "phone")]
    pub address: String,
    #[serde(default)]
    pub email: String,
}

/// Partial update; `None` leaves the field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRecipientRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "is_active")]
    pub is_eligible: Option<bool>,
}

/// One trading signal as produced by the analysis pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub ticker: String,
    #[serde(default)]
    pub last_date: String,
    pub last_close: i64,
    pub entry_price: i64,
    #[serde(default)]
    pub entry_gap_percent: f64,
    pub stop: f64,
    pub target: f64,
    #[serde(default)]
    pub risk_reward: f64,
    #[serde(default)]
    pub backtest_win_rate: f64,
    #[serde(default)]
    pub total_trades: i64,
    #[serde(default)]
    pub confluence_score: f64,
    /// Pipe-separated list, e.g. `"MA cross|Volume spike"`
    #[serde(default)]
    pub confluence_hits: String,
    #[serde(default)]
    pub overall_sentiment: String,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub sentiment_score: f64,
    #[serde(default)]
    pub analysis_summary: String,
}

/// Outcome of one broadcast invocation. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub ticker: String,
    pub recipients_notified: usize,
    pub recipients_targeted: usize,
    pub generated_at: DateTime<Utc>,
    pub processing_duration_ms: u64,
}

/// Reply posted back by an n8n workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct N8nCallback {
    #[serde(default)]
    pub message_id: String,
    pub phone: String,
    #[serde(default)]
    pub response: String,
    pub success: bool,
    #[serde(default)]
    pub error: String,
}

/// Reply posted back by a Flowise chatflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowiseCallback {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub message_id: String,
    pub phone: String,
    pub success: bool,
    #[serde(default)]
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_parsing_is_case_insensitive() {
        assert_eq!("n8n".parse::<WorkflowVariant>(), Ok(WorkflowVariant::N8n));
        assert_eq!(" Flowise ".parse::<WorkflowVariant>(), Ok(WorkflowVariant::Flowise));
        assert_eq!(
            "zapier".parse::<WorkflowVariant>(),
            Err(UnknownVariant("zapier".to_string()))
        );
    }

    #[test]
    fn test_variant_serializes_as_workflow_type_string() {
        let json = serde_json::to_string(&WorkflowVariant::Flowise).unwrap();
        assert_eq!(json, "\"flowise\"");
    }

    #[test]
    fn test_recipient_accepts_legacy_user_columns() {
        let json = r#"{
            "id": "7f1c2a4e-8b9d-4c3e-a2f1-0d9e8c7b6a54",
            "name": "Budi",
            "phone": "6281234567890",
            "email": "budi@example.com",
            "is_active": true,
            "created_at": "2025-08-10T00:00:00Z",
            "updated_at": "2025-08-10T00:00:00Z"
        }"#;

        let recipient: Recipient = serde_json::from_str(json).unwrap();
        assert_eq!(recipient.address, "6281234567890");
        assert!(recipient.is_eligible);
    }

    #[test]
    fn test_alert_optional_fields_default() {
        let json = r#"{
            "ticker": "BBCA",
            "last_close": 9420,
            "entry_price": 9655,
            "stop": 9180.0,
            "target": 9720.0
        }"#;

        let alert: Alert = serde_json::from_str(json).unwrap();
        assert_eq!(alert.ticker, "BBCA");
        assert!(alert.confluence_hits.is_empty());
        assert_eq!(alert.total_trades, 0);
    }

    #[test]
    fn test_callback_without_error_field() {
        let json = r#"{"message_id": "m-1", "phone": "628111", "response": "Halo", "success": true}"#;
        let callback: N8nCallback = serde_json::from_str(json).unwrap();
        assert!(callback.success);
        assert!(callback.error.is_empty());
    }
}
