//! Flowise prediction API client

use super::{user_context_json, WorkflowClient};
use crate::config::FlowiseConfig;
use crate::error::{BridgeError, Result};
use crate::types::OutboundRequest;
use async_trait::async_trait;
use bridge_types::WorkflowVariant;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::time::Duration;

pub struct FlowiseClient {
    base_url: String,
    flow_id: String,
    api_key: String,
    http_client: HttpClient,
}

impl FlowiseClient {
    pub fn new(config: FlowiseConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(BridgeError::Http)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            flow_id: config.flow_id,
            api_key: config.api_key,
            http_client,
        })
    }

    pub fn prediction_url(&self) -> String {
        format!("{}/api/v1/prediction/{}", self.base_url, self.flow_id)
    }

    /// Prediction body. The correlation ID travels as the Flowise session id.
    pub fn build_payload(request: &OutboundRequest) -> Value {
        json!({
            "question": request.text,
            "overrideConfig": {
                "sessionId": request.correlation_id.as_str(),
                "vars": {
                    "userContext": user_context_json(&request.sender_context),
                    "timestamp": request.sent_at.to_rfc3339(),
                }
            }
        })
    }
}

#[async_trait]
impl WorkflowClient for FlowiseClient {
    fn variant(&self) -> WorkflowVariant {
        WorkflowVariant::Flowise
    }

    async fn forward(&self, request: &OutboundRequest) -> Result<()> {
        log::info!(
            "Forwarding message {} from {} to Flowise flow {}",
            request.correlation_id,
            request.recipient_address,
            self.flow_id
        );

        let mut http_request = self
            .http_client
            .post(self.prediction_url())
            .json(&Self::build_payload(request));

        if !self.api_key.is_empty() {
            http_request = http_request.bearer_auth(&self.api_key);
        }

        let response = http_request.send().await.map_err(BridgeError::Http)?;

        if !response.status().is_success() {
            return Err(BridgeError::Workflow(format!(
                "Flowise prediction returned {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        Ok(())
    }
}
