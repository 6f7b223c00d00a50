//! HTTP messaging gateway transport
//!
//! The gateway hosts the actual network session and exposes it per session name:
//!
//! - `POST /api/sessions/{name}/start` with the stored identity, answers
//!   `{"status": "connected" | "pairing_required"}`
//! - `GET  /api/sessions/{name}/pairing-code`
//! - `POST /api/sessions/{name}/messages` with `{"to", "text"}`
//! - `POST /api/sessions/{name}/stop` and `/logout`
//! - `GET  /api/sessions/{name}/updates?offset=N&wait_secs=S` long-poll feed
//!
//! The update offset is kept across connections; a reconnect resumes after the
//! last delivered update.

use crate::config::GatewayConfig;
use crate::error::{BridgeError, Result};
use crate::session::address::ChatAddress;
use crate::session::transport::{ConnectOutcome, MessagingTransport, RawInbound, TransportEvent};
use crate::types::DeviceIdentity;
use async_trait::async_trait;
use reqwest::{Client as HttpClient, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct StartResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct PairingCodeResponse {
    code: String,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    #[serde(default)]
    updates: Vec<GatewayUpdate>,
}

/// One entry of the gateway update feed
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayUpdate {
    pub update_id: u64,
    #[serde(flatten)]
    pub kind: UpdateKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateKind {
    PairingCode {
        code: String,
    },
    Paired {
        identity: DeviceIdentity,
    },
    Connected,
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    LoggedOut,
    Message(RawInbound),
    #[serde(other)]
    Unknown,
}

impl UpdateKind {
    pub fn into_event(self) -> Option<TransportEvent> {
        match self {
            Self::PairingCode { code } => Some(TransportEvent::PairingCode(code)),
            Self::Paired { identity } => Some(TransportEvent::Paired(identity)),
            Self::Connected => Some(TransportEvent::Connected),
            Self::Disconnected { reason } => Some(TransportEvent::Disconnected { reason }),
            Self::LoggedOut => Some(TransportEvent::LoggedOut),
            Self::Message(raw) => Some(TransportEvent::Message(raw)),
            Self::Unknown => None,
        }
    }
}

/// Request plumbing shared by the transport and its poller task
#[derive(Clone)]
struct GatewayApi {
    base_url: String,
    session_name: String,
    api_key: String,
    wait_secs: u64,
    http_client: HttpClient,
}

impl GatewayApi {
    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/sessions/{}/{}", self.base_url, self.session_name, endpoint)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.api_key.is_empty() {
            request
        } else {
            request.header("X-Api-Key", &self.api_key)
        }
    }

    async fn check(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            return Err(BridgeError::Transport(format!(
                "Gateway {} failed: {} - {}",
                action,
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }
        Ok(response)
    }

    async fn post(&self, endpoint: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .authorize(self.http_client.post(self.url(endpoint)))
            .json(&body)
            .send()
            .await
            .map_err(BridgeError::Http)?;

        Self::check(response, endpoint).await
    }

    async fn fetch_updates(&self, offset: u64) -> Result<Vec<GatewayUpdate>> {
        let response = self
            .authorize(self.http_client.get(self.url("updates")))
            .query(&[("offset", offset), ("wait_secs", self.wait_secs)])
            .send()
            .await
            .map_err(BridgeError::Http)?;

        let body: UpdatesResponse = Self::check(response, "updates")
            .await?
            .json()
            .await
            .map_err(BridgeError::Http)?;

        Ok(body.updates)
    }
}

/// Next update id to request from the feed
#[derive(Debug, Clone, Default)]
struct UpdateCursor(Arc<AtomicU64>);

impl UpdateCursor {
    fn position(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    fn advance_past(&self, update_id: u64) {
        self.0.fetch_max(update_id + 1, Ordering::SeqCst);
    }
}

pub struct GatewayTransport {
    api: GatewayApi,
    poll_interval: Duration,
    cursor: UpdateCursor,
    poller: Mutex<Option<CancellationToken>>,
}

impl GatewayTransport {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(BridgeError::Http)?;

        Ok(Self {
            api: GatewayApi {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                session_name: config.session_name,
                api_key: config.api_key,
                // Long-poll must finish well inside the request timeout
                wait_secs: config.request_timeout_secs / 2,
                http_client,
            },
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            cursor: UpdateCursor::default(),
            poller: Mutex::new(None),
        })
    }

    fn stop_poller(&self) {
        let mut poller = self.poller.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(cancel) = poller.take() {
            cancel.cancel();
        }
    }

    fn spawn_poller(&self, events: mpsc::UnboundedSender<TransportEvent>) {
        let cancel = CancellationToken::new();
        {
            let mut poller = self.poller.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(previous) = poller.replace(cancel.clone()) {
                previous.cancel();
            }
        }

        tokio::spawn(poll_updates(
            self.api.clone(),
            self.poll_interval,
            self.cursor.clone(),
            events,
            cancel,
        ));
    }
}

async fn poll_updates(
    api: GatewayApi,
    poll_interval: Duration,
    cursor: UpdateCursor,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) {
    log::debug!(
        "Gateway update poller started for session {} at offset {}",
        api.session_name,
        cursor.position()
    );

    loop {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            fetched = api.fetch_updates(cursor.position()) => fetched,
        };

        let idle = match fetched {
            Ok(updates) => {
                let idle = updates.is_empty();
                for update in updates {
                    cursor.advance_past(update.update_id);
                    if let Some(event) = update.kind.into_event() {
                        if events.send(event).is_err() {
                            log::debug!("Session stopped listening, ending gateway poller");
                            return;
                        }
                    }
                }
                idle
            }
            Err(e) => {
                log::warn!("Gateway update poll failed: {}", e);
                true
            }
        };

        if idle {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    log::debug!("Gateway update poller stopped");
}

#[async_trait]
impl MessagingTransport for GatewayTransport {
    async fn connect(
        &self,
        identity: Option<&DeviceIdentity>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<ConnectOutcome> {
        self.stop_poller();

        let response: StartResponse = self
            .api
            .post("start", json!({ "identity": identity }))
            .await?
            .json()
            .await
            .map_err(BridgeError::Http)?;

        let outcome = match response.status.as_str() {
            "connected" => ConnectOutcome::Resumed,
            "pairing_required" => ConnectOutcome::PairingRequired,
            other => {
                return Err(BridgeError::Transport(format!(
                    "Gateway answered start with unknown status '{}'",
                    other
                )))
            }
        };

        self.spawn_poller(events);
        Ok(outcome)
    }

    async fn pairing_code(&self) -> Result<String> {
        let response = self
            .api
            .authorize(self.api.http_client.get(self.api.url("pairing-code")))
            .send()
            .await
            .map_err(BridgeError::Http)?;

        let body: PairingCodeResponse = GatewayApi::check(response, "pairing-code")
            .await?
            .json()
            .await
            .map_err(BridgeError::Http)?;

        Ok(body.code)
    }

    async fn send_text(&self, to: &ChatAddress, text: &str) -> Result<()> {
        self.api
            .post("messages", json!({ "to": to.to_string(), "text": text }))
            .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_poller();
        self.api.post("stop", json!({})).await?;
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.api.post("logout", json!({})).await?;
        self.stop_poller();
        Ok(())
    }
}
