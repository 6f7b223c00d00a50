//! End-to-end flow through the session manager, router and broadcast engine
//! with an in-process transport and workflow engine.

use async_trait::async_trait;
use bridge_core::config::{RoutingConfig, SessionConfig};
use bridge_core::session::address::ChatAddress;
use bridge_core::session::payload::RawMessage;
use bridge_core::session::transport::{ConnectOutcome, RawInbound, TransportEvent};
use bridge_core::{
    BridgeError, BroadcastEngine, DeviceIdentity, JsonDirectory, MemoryDeviceStore,
    MessageRouter, MessagingTransport, OutboundRequest, Result, SessionManager,
    WorkflowCallback, WorkflowClient,
};
use bridge_types::{Alert, CreateRecipientRequest, UpdateRecipientRequest, WorkflowVariant};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct LoopbackTransport {
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl LoopbackTransport {
    fn receive(&self, from: &str, text: &str) {
        let event = TransportEvent::Message(RawInbound {
            from: format!("{}@s.whatsapp.net", from),
            from_me: false,
            message: RawMessage {
                conversation: Some(text.to_string()),
                ..Default::default()
            },
            timestamp: Utc::now(),
        });
        self.events.lock().unwrap().as_ref().unwrap().send(event).unwrap();
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingTransport for LoopbackTransport {
    async fn connect(
        &self,
        _identity: Option<&DeviceIdentity>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<ConnectOutcome> {
        *self.events.lock().unwrap() = Some(events);
        Ok(ConnectOutcome::Resumed)
    }

    async fn pairing_code(&self) -> Result<String> {
        Err(BridgeError::NotAvailable("already paired".to_string()))
    }

    async fn send_text(&self, to: &ChatAddress, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push((to.user.clone(), text.to_string()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        Ok(())
    }
}

/// Hands every forwarded request to the test through a channel
struct ChannelEngine {
    requests: mpsc::UnboundedSender<OutboundRequest>,
}

#[async_trait]
impl WorkflowClient for ChannelEngine {
    fn variant(&self) -> WorkflowVariant {
        WorkflowVariant::N8n
    }

    async fn forward(&self, request: &OutboundRequest) -> Result<()> {
        self.requests
            .send(request.clone())
            .map_err(|_| BridgeError::Workflow("engine gone".to_string()))
    }
}

fn identity() -> DeviceIdentity {
    DeviceIdentity {
        device_id: "bridge-test".to_string(),
        secret: serde_json::Value::Null,
        paired_at: Utc::now(),
    }
}

async fn connected_session(transport: Arc<LoopbackTransport>) -> Arc<SessionManager> {
    let session = Arc::new(SessionManager::new(
        transport,
        Arc::new(MemoryDeviceStore::with_identity(identity())),
        SessionConfig::default(),
    ));
    session.start().await.unwrap();
    assert!(session.is_connected());
    session
}

fn directory_with_users() -> Arc<JsonDirectory> {
    let directory = Arc::new(JsonDirectory::in_memory());
    directory.set_active_variant(WorkflowVariant::N8n).unwrap();
    for (name, address) in [("Budi", "6281111"), ("Ani", "6282222"), ("Citra", "6283333")] {
        directory
            .create_recipient(CreateRecipientRequest {
                name: name.to_string(),
                address: address.to_string(),
                email: String::new(),
            })
            .unwrap();
    }
    directory
}

#[tokio::test]
async fn test_chat_round_trip() {
    let transport = Arc::new(LoopbackTransport::default());
    let session = connected_session(transport.clone()).await;
    let directory = directory_with_users();
    let (engine_tx, mut engine_rx) = mpsc::unbounded_channel();

    let router = Arc::new(
        MessageRouter::new(
            directory.clone(),
            directory.clone(),
            session.clone(),
            RoutingConfig::default(),
        )
        .with_client(Arc::new(ChannelEngine { requests: engine_tx })),
    );

    let inbound = session.subscribe();
    let runner = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.run(inbound).await })
    };

    transport.receive("6281111", "Harga BBCA hari ini?");

    let request = tokio::time::timeout(Duration::from_secs(2), engine_rx.recv())
        .await
        .expect("engine never received the message")
        .unwrap();
    assert_eq!(request.text, "Harga BBCA hari ini?");
    assert_eq!(request.sender_context.name, "Budi");

    router
        .handle_callback(
            WorkflowVariant::N8n,
            WorkflowCallback {
                recipient_address: request.recipient_address.clone(),
                reply_text: "BBCA ditutup di 9.420".to_string(),
                success: true,
                error_detail: None,
                correlation_id: Some(request.correlation_id.clone()),
            },
        )
        .await
        .unwrap();

    assert_eq!(
        transport.sent(),
        vec![("6281111".to_string(), "BBCA ditutup di 9.420".to_string())]
    );

    // Stopping the session ends the inbound stream and with it the router loop
    session.stop().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), runner)
        .await
        .expect("router did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_broadcast_reaches_eligible_recipients() {
    let transport = Arc::new(LoopbackTransport::default());
    let session = connected_session(transport.clone()).await;
    let directory = directory_with_users();

    let ani = directory
        .list_recipients()
        .into_iter()
        .find(|r| r.name == "Ani")
        .unwrap();
    directory
        .update_recipient(
            ani.id,
            UpdateRecipientRequest {
                is_eligible: Some(false),
                ..Default::default()
            },
        )
        .unwrap();

    let engine = BroadcastEngine::new(directory, session, Duration::from_secs(5));
    let alert: Alert = serde_json::from_str(
        r#"{
            "ticker": "BBRI",
            "last_close": 4550,
            "entry_price": 4600,
            "entry_gap_percent": 1.1,
            "stop": 4420.5,
            "target": 4900.0,
            "risk_reward": 1.67,
            "overall_sentiment": "bullish"
        }"#,
    )
    .unwrap();

    let result = engine.broadcast(&alert).await.unwrap();

    assert_eq!(result.recipients_notified, 2);
    assert_eq!(result.recipients_targeted, 2);

    let sent = transport.sent();
    let addresses: Vec<_> = sent.iter().map(|(a, _)| a.as_str()).collect();
    assert_eq!(addresses, vec!["6281111", "6283333"]);
    assert!(sent[0].1.contains("• *Stop Loss*: Rp 4,420"));
}

#[tokio::test]
async fn test_broadcast_while_disconnected_notifies_nobody() {
    let transport = Arc::new(LoopbackTransport::default());
    let session = connected_session(transport.clone()).await;
    session.stop().await.unwrap();

    let engine = BroadcastEngine::new(directory_with_users(), session, Duration::from_secs(5));
    let alert: Alert = serde_json::from_str(
        r#"{"ticker": "ASII", "last_close": 5000, "entry_price": 5100, "stop": 4800.0, "target": 5600.0}"#,
    )
    .unwrap();

    let result = engine.broadcast(&alert).await.unwrap();
    assert_eq!(result.recipients_targeted, 3);
    assert_eq!(result.recipients_notified, 0);
    assert!(transport.sent().is_empty());
}
