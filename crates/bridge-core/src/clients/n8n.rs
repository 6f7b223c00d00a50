//! n8n webhook client

use super::{user_context_json, WorkflowClient};
use crate::config::N8nConfig;
use crate::error::{BridgeError, Result};
use crate::types::OutboundRequest;
use async_trait::async_trait;
use bridge_types::WorkflowVariant;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::time::Duration;

pub struct N8nClient {
    webhook_url: String,
    api_key: String,
    http_client: HttpClient,
}

impl N8nClient {
    pub fn new(config: N8nConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(BridgeError::Http)?;

        Ok(Self {
            webhook_url: config.webhook_url,
            api_key: config.api_key,
            http_client,
        })
    }

    /// Webhook body. `message_id` is echoed back in the callback.
    pub fn build_payload(request: &OutboundRequest) -> Value {
        json!({
            "user_context": user_context_json(&request.sender_context),
            "message": request.text,
            "message_id": request.correlation_id.as_str(),
            "timestamp": request.sent_at.to_rfc3339(),
        })
    }
}

#[async_trait]
impl WorkflowClient for N8nClient {
    fn variant(&self) -> WorkflowVariant {
        WorkflowVariant::N8n
    }

    async fn forward(&self, request: &OutboundRequest) -> Result<()> {
        log::info!(
            "Forwarding message {} from {} to n8n",
            request.correlation_id,
            request.recipient_address
        );

        let mut http_request = self
            .http_client
            .post(&self.webhook_url)
            .json(&Self::build_payload(request));

        if !self.api_key.is_empty() {
            http_request = http_request.bearer_auth(&self.api_key);
        }

        let response = http_request.send().await.map_err(BridgeError::Http)?;

        if !response.status().is_success() {
            return Err(BridgeError::Workflow(format!(
                "n8n webhook returned {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        log::debug!("n8n accepted message {}", request.correlation_id);
        Ok(())
    }
}
