//! Message router between the chat session and the workflow engines
//!
//! Inbound: sender lookup, eligibility gate, active variant, forward.
//! Callback: validation, correlation, reply through the session.

use crate::clients::WorkflowClient;
use crate::config::RoutingConfig;
use crate::directory::{RecipientDirectory, WorkflowConfigSource};
use crate::error::{BridgeError, Result};
use crate::session::{normalize_address, MessageSender};
use crate::types::{CorrelationId, InboundMessage, OutboundRequest, SenderContext, WorkflowCallback};
use bridge_types::WorkflowVariant;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_stream::{Stream, StreamExt};

/// How many answered correlation IDs are remembered for duplicate detection
const COMPLETED_HISTORY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyText,
    UnknownSender,
    IneligibleSender,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::EmptyText => "message has no text",
            Self::UnknownSender => "sender is not in the directory",
            Self::IneligibleSender => "sender is not eligible",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Forwarded {
        correlation_id: CorrelationId,
        variant: WorkflowVariant,
    },
    Ignored(IgnoreReason),
}

#[derive(Debug)]
struct PendingReply {
    recipient_address: String,
    variant: WorkflowVariant,
    registered_at: Instant,
}

/// Forwarded requests still waiting for their callback
#[derive(Debug, Default)]
struct InFlightRegistry {
    pending: HashMap<CorrelationId, PendingReply>,
    delivering: HashSet<CorrelationId>,
    completed: VecDeque<CorrelationId>,
}

impl InFlightRegistry {
    fn register(&mut self, request: &OutboundRequest, variant: WorkflowVariant) {
        self.pending.insert(
            request.correlation_id.clone(),
            PendingReply {
                recipient_address: request.recipient_address.clone(),
                variant,
                registered_at: Instant::now(),
            },
        );
    }

    fn release(&mut self, id: &CorrelationId) {
        self.pending.remove(id);
    }

    fn prune(&mut self, window: Duration) {
        let before = self.pending.len();
        self.pending
            .retain(|_, pending| pending.registered_at.elapsed() < window);

        let expired = before - self.pending.len();
        if expired > 0 {
            log::warn!("{} forwarded message(s) expired without a reply", expired);
        }
    }

    /// Reserve `id` for one delivery attempt. Duplicates and address mismatches
    /// are rejected; unknown IDs are accepted and delivered by address.
    fn begin_delivery(&mut self, id: &CorrelationId, address: &str, variant: WorkflowVariant) -> Result<()> {
        if self.completed.contains(id) || self.delivering.contains(id) {
            return Err(BridgeError::Workflow(format!(
                "duplicate callback for message {}",
                id
            )));
        }

        match self.pending.get(id) {
            Some(pending) if pending.recipient_address != address => {
                return Err(BridgeError::Workflow(format!(
                    "callback for message {} is addressed to {}, expected {}",
                    id, address, pending.recipient_address
                )));
            }
            Some(pending) if pending.variant != variant => {
                log::warn!(
                    "Message {} was forwarded to {} but answered by {}",
                    id,
                    pending.variant,
                    variant
                );
            }
            Some(_) => {}
            None => {
                log::debug!("Callback for untracked message {}, delivering by address", id);
            }
        }

        self.delivering.insert(id.clone());
        Ok(())
    }

    /// The reply reached the user; later callbacks for `id` are duplicates
    fn finish_delivery(&mut self, id: &CorrelationId) {
        self.delivering.remove(id);
        self.pending.remove(id);

        if self.completed.len() >= COMPLETED_HISTORY {
            self.completed.pop_front();
        }
        self.completed.push_back(id.clone());
    }

    /// The send failed; the entry stays pending so the callback can be resubmitted
    fn abandon_delivery(&mut self, id: &CorrelationId) {
        self.delivering.remove(id);
    }
}

pub struct MessageRouter {
    directory: Arc<dyn RecipientDirectory>,
    workflow_config: Arc<dyn WorkflowConfigSource>,
    clients: HashMap<WorkflowVariant, Arc<dyn WorkflowClient>>,
    sender: Arc<dyn MessageSender>,
    config: RoutingConfig,
    in_flight: Mutex<InFlightRegistry>,
}

impl MessageRouter {
    pub fn new(
        directory: Arc<dyn RecipientDirectory>,
        workflow_config: Arc<dyn WorkflowConfigSource>,
        sender: Arc<dyn MessageSender>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            directory,
            workflow_config,
            clients: HashMap::new(),
            sender,
            config,
            in_flight: Mutex::new(InFlightRegistry::default()),
        }
    }

    /// Register the client for one engine variant
    pub fn with_client(mut self, client: Arc<dyn WorkflowClient>) -> Self {
        self.clients.insert(client.variant(), client);
        self
    }

    fn registry(&self) -> MutexGuard<'_, InFlightRegistry> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Forwarded messages still waiting for a reply
    pub fn pending_replies(&self) -> usize {
        let mut registry = self.registry();
        registry.prune(self.config.reply_window());
        registry.pending.len()
    }

    /// Bound a directory call by the lookup timeout
    async fn lookup<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match timeout(self.config.lookup_timeout(), call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e @ BridgeError::Directory(_))) => Err(e),
            Ok(Err(e)) => Err(BridgeError::Directory(format!("{}: {}", what, e))),
            Err(_) => Err(BridgeError::Timeout(format!(
                "{} took longer than {}s",
                what,
                self.config.lookup_timeout_secs
            ))),
        }
    }

    /// Route one inbound chat message to the active workflow engine
    pub async fn handle_inbound(&self, message: &InboundMessage) -> Result<RouteOutcome> {
        if message.text.trim().is_empty() {
            return Ok(RouteOutcome::Ignored(IgnoreReason::EmptyText));
        }

        let recipient = self
            .lookup(
                "sender lookup",
                self.directory.find_by_address(&message.sender_address),
            )
            .await?;

        let require_eligible = self.config.require_eligible_sender;
        let sender_context = match recipient {
            Some(recipient) if recipient.is_eligible || !require_eligible => {
                SenderContext::from(&recipient)
            }
            Some(_) => {
                log::info!("Ignoring message from ineligible sender {}", message.sender_address);
                return Ok(RouteOutcome::Ignored(IgnoreReason::IneligibleSender));
            }
            None if require_eligible => {
                log::info!("Ignoring message from unknown sender {}", message.sender_address);
                return Ok(RouteOutcome::Ignored(IgnoreReason::UnknownSender));
            }
            None => SenderContext::anonymous(&message.sender_address),
        };

        let variant = self
            .lookup("workflow lookup", self.workflow_config.active_variant())
            .await?;

        let client = self.clients.get(&variant).ok_or_else(|| {
            BridgeError::Workflow(format!("no client configured for workflow {}", variant))
        })?;

        let request = OutboundRequest::new(
            message.sender_address.clone(),
            sender_context,
            message.text.clone(),
        );

        {
            let mut registry = self.registry();
            registry.prune(self.config.reply_window());
            registry.register(&request, variant);
        }

        let forwarded = match timeout(self.config.forward_timeout(), client.forward(&request)).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout(format!(
                "{} did not accept message {} within {}s",
                variant, request.correlation_id, self.config.forward_timeout_secs
            ))),
        };

        if let Err(e) = forwarded {
            self.registry().release(&request.correlation_id);
            log::error!(
                "Failed to forward message {} from {} to {}: {}",
                request.correlation_id,
                request.recipient_address,
                variant,
                e
            );
            return Err(match e {
                BridgeError::Timeout(_) | BridgeError::Workflow(_) => e,
                other => BridgeError::Workflow(other.to_string()),
            });
        }

        log::info!(
            "Forwarded message {} from {} to {}",
            request.correlation_id,
            request.recipient_address,
            variant
        );

        Ok(RouteOutcome::Forwarded {
            correlation_id: request.correlation_id,
            variant,
        })
    }

    /// Deliver a workflow engine's reply to the user it belongs to
    pub async fn handle_callback(&self, variant: WorkflowVariant, callback: WorkflowCallback) -> Result<()> {
        if !callback.success {
            let detail = callback.error_detail.as_deref().unwrap_or("unknown error");
            log::warn!(
                "{} reported a failure for {}: {}",
                variant,
                callback.recipient_address,
                detail
            );
            if let Some(id) = &callback.correlation_id {
                self.registry().release(id);
            }
            return Err(BridgeError::Workflow(format!(
                "{} workflow failed: {}",
                variant, detail
            )));
        }

        if callback.reply_text.trim().is_empty() {
            return Err(BridgeError::Workflow(format!(
                "{} workflow returned an empty response",
                variant
            )));
        }

        let address = normalize_address(&callback.recipient_address)?;

        if let Some(id) = &callback.correlation_id {
            let mut registry = self.registry();
            registry.prune(self.config.reply_window());
            registry.begin_delivery(id, &address, variant)?;
        }

        let sent = self.sender.send_message(&address, &callback.reply_text).await;

        if let Some(id) = &callback.correlation_id {
            let mut registry = self.registry();
            match &sent {
                Ok(()) => registry.finish_delivery(id),
                Err(_) => registry.abandon_delivery(id),
            }
        }

        if let Err(e) = sent {
            log::error!("Failed to deliver {} reply to {}: {}", variant, address, e);
            return Err(e);
        }

        log::info!("Delivered {} reply to {}", variant, address);
        Ok(())
    }

    /// Drain an inbound stream one message at a time until it ends
    pub async fn run<S>(&self, mut inbound: S)
    where
        S: Stream<Item = InboundMessage> + Unpin,
    {
        log::info!("Message router started");

        while let Some(message) = inbound.next().await {
            match self.handle_inbound(&message).await {
                Ok(RouteOutcome::Forwarded { .. }) => {}
                Ok(RouteOutcome::Ignored(reason)) => {
                    log::debug!("Message from {} ignored: {}", message.sender_address, reason);
                }
                Err(e) => {
                    log::error!("Failed to route message from {}: {}", message.sender_address, e);
                }
            }
        }

        log::info!("Inbound stream closed, message router stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_types::Recipient;
    use chrono::Utc;
    use uuid::Uuid;

    struct StaticDirectory {
        recipients: Vec<Recipient>,
    }

    #[async_trait]
    impl RecipientDirectory for StaticDirectory {
        async fn find_by_address(&self, address: &str) -> Result<Option<Recipient>> {
            Ok(self.recipients.iter().find(|r| r.address == address).cloned())
        }

        async fn list_eligible(&self) -> Result<Vec<Recipient>> {
            Ok(self.recipients.iter().filter(|r| r.is_eligible).cloned().collect())
        }
    }

    #[derive(Default)]
    struct SwitchableVariant {
        variant: Mutex<Option<WorkflowVariant>>,
    }

    impl SwitchableVariant {
        fn set(&self, variant: WorkflowVariant) {
            *self.variant.lock().unwrap() = Some(variant);
        }
    }

    #[async_trait]
    impl WorkflowConfigSource for SwitchableVariant {
        async fn active_variant(&self) -> Result<WorkflowVariant> {
            self.variant.lock().unwrap().ok_or_else(|| {
                BridgeError::Directory("no active workflow configuration found".to_string())
            })
        }
    }

    /// Never answers within any reasonable lookup timeout
    struct StalledDirectory;

    #[async_trait]
    impl RecipientDirectory for StalledDirectory {
        async fn find_by_address(&self, _address: &str) -> Result<Option<Recipient>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }

        async fn list_eligible(&self) -> Result<Vec<Recipient>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    struct RecordingClient {
        variant: WorkflowVariant,
        fail: bool,
        delay: Option<Duration>,
        forwarded: Mutex<Vec<OutboundRequest>>,
    }

    impl RecordingClient {
        fn new(variant: WorkflowVariant) -> Self {
            Self {
                variant,
                fail: false,
                delay: None,
                forwarded: Mutex::new(Vec::new()),
            }
        }

        fn texts(&self) -> Vec<String> {
            self.forwarded.lock().unwrap().iter().map(|r| r.text.clone()).collect()
        }
    }

    #[async_trait]
    impl WorkflowClient for RecordingClient {
        fn variant(&self) -> WorkflowVariant {
            self.variant
        }

        async fn forward(&self, request: &OutboundRequest) -> Result<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(BridgeError::Workflow("engine returned 500".to_string()));
            }
            self.forwarded.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    /// Records sends; the first `outage` sends fail as if the session dropped
    #[derive(Default)]
    struct RecordingSender {
        outage: Mutex<usize>,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSender {
        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }

        fn fail_next(&self, count: usize) {
            *self.outage.lock().unwrap() = count;
        }
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        async fn send_message(&self, address: &str, text: &str) -> Result<()> {
            {
                let mut outage = self.outage.lock().unwrap();
                if *outage > 0 {
                    *outage -= 1;
                    return Err(BridgeError::NotConnected);
                }
            }
            self.sent.lock().unwrap().push((address.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct Harness {
        router: MessageRouter,
        variant: Arc<SwitchableVariant>,
        n8n: Arc<RecordingClient>,
        flowise: Arc<RecordingClient>,
        sender: Arc<RecordingSender>,
    }

    fn recipient(address: &str, is_eligible: bool) -> Recipient {
        Recipient {
            id: Uuid::new_v4(),
            name: "Budi".to_string(),
            address: address.to_string(),
            email: "budi@example.com".to_string(),
            is_eligible,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn harness_with(config: RoutingConfig, n8n: RecordingClient) -> Harness {
        let directory = Arc::new(StaticDirectory {
            recipients: vec![recipient("628111", true), recipient("628222", false)],
        });
        let variant = Arc::new(SwitchableVariant::default());
        variant.set(WorkflowVariant::N8n);
        let n8n = Arc::new(n8n);
        let flowise = Arc::new(RecordingClient::new(WorkflowVariant::Flowise));
        let sender = Arc::new(RecordingSender::default());

        let router = MessageRouter::new(directory, variant.clone(), sender.clone(), config)
            .with_client(n8n.clone())
            .with_client(flowise.clone());

        Harness {
            router,
            variant,
            n8n,
            flowise,
            sender,
        }
    }

    fn harness() -> Harness {
        harness_with(RoutingConfig::default(), RecordingClient::new(WorkflowVariant::N8n))
    }

    fn inbound(address: &str, text: &str) -> InboundMessage {
        InboundMessage {
            sender_address: address.to_string(),
            text: text.to_string(),
            received_at: Utc::now(),
        }
    }

    fn reply(address: &str, text: &str, id: Option<&CorrelationId>) -> WorkflowCallback {
        WorkflowCallback {
            recipient_address: address.to_string(),
            reply_text: text.to_string(),
            success: true,
            error_detail: None,
            correlation_id: id.cloned(),
        }
    }

    #[tokio::test]
    async fn test_eligible_sender_is_forwarded() {
        let h = harness();

        let outcome = h.router.handle_inbound(&inbound("628111", "Harga BBCA?")).await.unwrap();

        match outcome {
            RouteOutcome::Forwarded { variant, .. } => assert_eq!(variant, WorkflowVariant::N8n),
            other => panic!("unexpected outcome {:?}", other),
        }
        let forwarded = h.n8n.forwarded.lock().unwrap();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].sender_context.name, "Budi");
        assert_eq!(forwarded[0].recipient_address, "628111");
        assert_eq!(h.router.pending_replies(), 1);
    }

    #[tokio::test]
    async fn test_unknown_and_ineligible_senders_are_ignored() {
        let h = harness();

        assert_eq!(
            h.router.handle_inbound(&inbound("628999", "hi")).await.unwrap(),
            RouteOutcome::Ignored(IgnoreReason::UnknownSender)
        );
        assert_eq!(
            h.router.handle_inbound(&inbound("628222", "hi")).await.unwrap(),
            RouteOutcome::Ignored(IgnoreReason::IneligibleSender)
        );
        assert_eq!(
            h.router.handle_inbound(&inbound("628111", "  ")).await.unwrap(),
            RouteOutcome::Ignored(IgnoreReason::EmptyText)
        );
        assert!(h.n8n.texts().is_empty());
    }

    #[tokio::test]
    async fn test_open_routing_uses_anonymous_context() {
        let config = RoutingConfig {
            require_eligible_sender: false,
            ..RoutingConfig::default()
        };
        let h = harness_with(config, RecordingClient::new(WorkflowVariant::N8n));

        h.router.handle_inbound(&inbound("628999", "hi")).await.unwrap();

        let forwarded = h.n8n.forwarded.lock().unwrap();
        assert_eq!(forwarded[0].sender_context, SenderContext::anonymous("628999"));
    }

    #[tokio::test]
    async fn test_variant_switch_applies_to_next_message() {
        let h = harness();

        h.router.handle_inbound(&inbound("628111", "first")).await.unwrap();
        h.variant.set(WorkflowVariant::Flowise);
        h.router.handle_inbound(&inbound("628111", "second")).await.unwrap();

        assert_eq!(h.n8n.texts(), vec!["first"]);
        assert_eq!(h.flowise.texts(), vec!["second"]);
    }

    #[tokio::test]
    async fn test_missing_workflow_configuration() {
        let h = harness();
        *h.variant.variant.lock().unwrap() = None;

        let result = h.router.handle_inbound(&inbound("628111", "hi")).await;
        assert!(matches!(result, Err(BridgeError::Directory(_))));
    }

    #[tokio::test]
    async fn test_forward_failure_sends_nothing() {
        let failing = RecordingClient {
            fail: true,
            ..RecordingClient::new(WorkflowVariant::N8n)
        };
        let h = harness_with(RoutingConfig::default(), failing);

        let result = h.router.handle_inbound(&inbound("628111", "hi")).await;

        assert!(matches!(result, Err(BridgeError::Workflow(_))));
        assert_eq!(h.router.pending_replies(), 0);
        assert!(h.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_callback_delivered_once() {
        let h = harness();
        let outcome = h.router.handle_inbound(&inbound("628111", "hi")).await.unwrap();
        let RouteOutcome::Forwarded { correlation_id, .. } = outcome else {
            panic!("message was not forwarded");
        };

        h.router
            .handle_callback(WorkflowVariant::N8n, reply("628111", "Halo!", Some(&correlation_id)))
            .await
            .unwrap();
        let duplicate = h
            .router
            .handle_callback(WorkflowVariant::N8n, reply("628111", "Halo!", Some(&correlation_id)))
            .await;

        assert!(matches!(duplicate, Err(BridgeError::Workflow(_))));
        assert_eq!(h.sender.sent(), vec![("628111".to_string(), "Halo!".to_string())]);
        assert_eq!(h.router.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_failed_or_empty_callback_sends_nothing() {
        let h = harness();

        let mut failed = reply("628111", "ignored", None);
        failed.success = false;
        failed.error_detail = Some("LLM quota exceeded".to_string());
        assert!(matches!(
            h.router.handle_callback(WorkflowVariant::N8n, failed).await,
            Err(BridgeError::Workflow(_))
        ));

        assert!(matches!(
            h.router
                .handle_callback(WorkflowVariant::Flowise, reply("628111", "   ", None))
                .await,
            Err(BridgeError::Workflow(_))
        ));

        assert!(h.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_callback_address_must_match_request() {
        let h = harness();
        let RouteOutcome::Forwarded { correlation_id, .. } =
            h.router.handle_inbound(&inbound("628111", "hi")).await.unwrap()
        else {
            panic!("message was not forwarded");
        };

        let result = h
            .router
            .handle_callback(WorkflowVariant::N8n, reply("628333", "wrong user", Some(&correlation_id)))
            .await;

        assert!(matches!(result, Err(BridgeError::Workflow(_))));
        assert!(h.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_untracked_callback_is_delivered_by_address() {
        let h = harness();
        let id = CorrelationId::from_string("engine-generated");

        h.router
            .handle_callback(WorkflowVariant::Flowise, reply("+62 811-1", "Update", Some(&id)))
            .await
            .unwrap();

        assert_eq!(h.sender.sent(), vec![("628111".to_string(), "Update".to_string())]);
    }

    #[tokio::test]
    async fn test_callback_with_invalid_address() {
        let h = harness();
        let result = h
            .router
            .handle_callback(WorkflowVariant::N8n, reply("unknown", "hi", None))
            .await;
        assert!(matches!(result, Err(BridgeError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_unanswered_requests_expire() {
        let config = RoutingConfig {
            reply_window_secs: 0,
            ..RoutingConfig::default()
        };
        let h = harness_with(config, RecordingClient::new(WorkflowVariant::N8n));

        h.router.handle_inbound(&inbound("628111", "hi")).await.unwrap();
        assert_eq!(h.router.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_reply_can_be_resubmitted_after_failed_send() {
        let h = harness();
        let RouteOutcome::Forwarded { correlation_id, .. } =
            h.router.handle_inbound(&inbound("628111", "hi")).await.unwrap()
        else {
            panic!("message was not forwarded");
        };

        h.sender.fail_next(1);
        let first = h
            .router
            .handle_callback(WorkflowVariant::N8n, reply("628111", "Halo!", Some(&correlation_id)))
            .await;
        assert!(matches!(first, Err(BridgeError::NotConnected)));
        assert_eq!(h.router.pending_replies(), 1, "Failed delivery keeps the request pending");

        h.router
            .handle_callback(WorkflowVariant::N8n, reply("628111", "Halo!", Some(&correlation_id)))
            .await
            .unwrap();
        let again = h
            .router
            .handle_callback(WorkflowVariant::N8n, reply("628111", "Halo!", Some(&correlation_id)))
            .await;

        assert!(matches!(again, Err(BridgeError::Workflow(_))));
        assert_eq!(h.sender.sent(), vec![("628111".to_string(), "Halo!".to_string())]);
        assert_eq!(h.router.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_failed_callback_without_address_is_workflow_error() {
        let h = harness();

        let mut failed = reply("", "", Some(&CorrelationId::from_string("m-1")));
        failed.success = false;
        failed.error_detail = Some("flow crashed".to_string());

        let result = h.router.handle_callback(WorkflowVariant::N8n, failed).await;

        assert!(matches!(result, Err(BridgeError::Workflow(_))));
        assert!(h.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_engine_failure_releases_pending_request() {
        let h = harness();
        let RouteOutcome::Forwarded { correlation_id, .. } =
            h.router.handle_inbound(&inbound("628111", "hi")).await.unwrap()
        else {
            panic!("message was not forwarded");
        };

        let mut failed = reply("628111", "", Some(&correlation_id));
        failed.success = false;
        assert!(h.router.handle_callback(WorkflowVariant::N8n, failed).await.is_err());

        assert_eq!(h.router.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_stalled_directory_times_out() {
        let config = RoutingConfig {
            lookup_timeout_secs: 1,
            ..RoutingConfig::default()
        };
        let n8n = Arc::new(RecordingClient::new(WorkflowVariant::N8n));
        let variant = Arc::new(SwitchableVariant::default());
        variant.set(WorkflowVariant::N8n);
        let router = MessageRouter::new(
            Arc::new(StalledDirectory),
            variant,
            Arc::new(RecordingSender::default()),
            config,
        )
        .with_client(n8n.clone());

        let result = router.handle_inbound(&inbound("628111", "hi")).await;

        assert!(matches!(result, Err(BridgeError::Timeout(_))));
        assert!(n8n.texts().is_empty());
    }

    #[tokio::test]
    async fn test_slow_engine_times_out() {
        let config = RoutingConfig {
            forward_timeout_secs: 1,
            ..RoutingConfig::default()
        };
        let slow = RecordingClient {
            delay: Some(Duration::from_secs(30)),
            ..RecordingClient::new(WorkflowVariant::N8n)
        };
        let h = harness_with(config, slow);

        let result = h.router.handle_inbound(&inbound("628111", "hi")).await;

        assert!(matches!(result, Err(BridgeError::Timeout(_))));
        assert_eq!(h.router.pending_replies(), 0);
        assert!(h.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_run_processes_stream_in_order() {
        let h = harness();
        let messages = vec![
            inbound("628111", "one"),
            inbound("628999", "stranger"),
            inbound("628111", "two"),
            inbound("628111", "three"),
        ];

        h.router.run(tokio_stream::iter(messages)).await;

        assert_eq!(h.n8n.texts(), vec!["one", "two", "three"]);
    }
}
