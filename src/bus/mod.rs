//! Message bus — inter-agent pub/sub with request/response correlation.
//!
//! Delivery rules for `publish`:
//! - a message with a `target_agent` goes to that agent's subscribers only,
//! - a message without one goes to every agent subscriber (broadcast),
//! - every message additionally goes to the subscribers of its type.
//!
//! History is kept per run as a bounded ring; delivery order and history
//! order are the same (FIFO), priority is advisory only.

pub mod model;
pub(crate) mod pending;
pub mod topic;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub use model::{Message, MessagePayload, MessageType, OutgoingMessage, Priority, SignalPayload};
pub use topic::{Handler, Subscription, Topic};

use crate::agent::AgentType;
use crate::config::BusConfig;
use crate::error::BusError;
use pending::PendingRequests;
use topic::TopicTable;

/// In-process message bus shared by every run.
pub struct MessageBus {
    config: BusConfig,
    /// run_id → bounded message ring.
    history: RwLock<HashMap<String, VecDeque<Message>>>,
    topics: Arc<RwLock<TopicTable>>,
    pending: PendingRequests,
    /// Serializes append + dispatch so history and delivery order agree.
    delivery: Mutex<()>,
    next_subscription: AtomicU64,
}

impl MessageBus {
    /// Create a new bus.
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            history: RwLock::new(HashMap::new()),
            topics: Arc::new(RwLock::new(TopicTable::default())),
            pending: PendingRequests::default(),
            delivery: Mutex::new(()),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Stamp, record and deliver a message.
    pub async fn publish(&self, outgoing: OutgoingMessage) -> Message {
        let message = outgoing.into_message();
        let _delivery = self.delivery.lock().await;

        {
            let mut history = self.history.write().await;
            let ring = history.entry(message.run_id.clone()).or_default();
            ring.push_back(message.clone());
            while ring.len() > self.config.max_history_per_run {
                ring.pop_front();
            }
        }

        let handlers = {
            let topics = self.topics.read().await;
            let primary = match message.target_agent {
                Some(target) => Topic::Agent(target),
                None => Topic::Broadcast,
            };
            let mut handlers = topics.handlers_for(primary);
            handlers.extend(topics.handlers_for(Topic::Type(message.message_type)));
            handlers
        };

        debug!(
            message_id = %message.id,
            run_id = %message.run_id,
            kind = %message.message_type,
            source = %message.source_agent,
            target = ?message.target_agent,
            handlers = handlers.len(),
            "Published message"
        );

        for handler in handlers {
            handler(&message);
        }

        message
    }

    /// Ask `target` for an analysis and wait for its answer, using the
    /// configured request timeout.
    pub async fn request_analysis(
        &self,
        source: AgentType,
        target: AgentType,
        run_id: &str,
        question: impl Into<String>,
        context: serde_json::Value,
    ) -> Result<serde_json::Value, BusError> {
        let timeout = self.config.request_timeout;
        self.request_analysis_with_timeout(source, target, run_id, question, context, timeout)
            .await
    }

    /// Like [`MessageBus::request_analysis`] with an explicit timeout.
    ///
    /// Resolves with the value given to `respond_to_request(.., success = true)`,
    /// fails with [`BusError::Rejected`] on `success = false`, with
    /// [`BusError::Timeout`] when nobody answers in time, or with
    /// [`BusError::RunClosed`] when the run is disposed first.
    pub async fn request_analysis_with_timeout(
        &self,
        source: AgentType,
        target: AgentType,
        run_id: &str,
        question: impl Into<String>,
        context: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, BusError> {
        let (request_id, request) = analysis_request(source, target, run_id, question.into(), context);
        self.await_response(request_id, request, timeout).await
    }

    /// Like [`MessageBus::request_analysis`], with the request message
    /// stamped with `conversation_id`.
    pub async fn request_analysis_in_conversation(
        &self,
        source: AgentType,
        target: AgentType,
        run_id: &str,
        conversation_id: Option<String>,
        question: impl Into<String>,
        context: serde_json::Value,
    ) -> Result<serde_json::Value, BusError> {
        let (request_id, request) = analysis_request(source, target, run_id, question.into(), context);
        let timeout = self.config.request_timeout;
        self.await_response(request_id, request.in_conversation(conversation_id), timeout)
            .await
    }

    async fn await_response(
        &self,
        request_id: String,
        request: OutgoingMessage,
        timeout: Duration,
    ) -> Result<serde_json::Value, BusError> {
        let reply_rx = self
            .pending
            .register(&request_id, request.source_agent, &request.run_id, timeout)
            .await;

        info!(
            request_id = %request_id,
            run_id = %request.run_id,
            source = %request.source_agent,
            target = ?request.target_agent,
            "Analysis requested"
        );
        self.publish(request).await;

        match reply_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(BusError::ChannelClosed { request_id }),
        }
    }

    /// Answer a pending analysis request.
    ///
    /// Returns `true` if a waiting request was settled by this call. A
    /// `response_ready` message is published either way.
    pub async fn respond_to_request(
        &self,
        source: AgentType,
        request_id: &str,
        run_id: &str,
        response: serde_json::Value,
        success: bool,
    ) -> bool {
        let entry = self.pending.take(request_id).await;
        let requester = entry.as_ref().map(|e| e.requester);

        let settled = match entry {
            Some(entry) => {
                let outcome = if success {
                    Ok(response.clone())
                } else {
                    Err(BusError::Rejected {
                        request_id: request_id.to_string(),
                        response: response.clone(),
                    })
                };
                entry.settle(outcome)
            }
            None => {
                debug!(
                    request_id = %request_id,
                    run_id = %run_id,
                    "No pending request for response; recording for audit only"
                );
                false
            }
        };

        let mut audit = OutgoingMessage::new(
            MessageType::ResponseReady,
            source,
            run_id,
            MessagePayload::AnalysisResponse {
                request_id: request_id.to_string(),
                response,
                success,
            },
        );
        if let Some(requester) = requester {
            audit = audit.to(requester);
        }
        self.publish(audit).await;

        settled
    }

    /// Receive messages addressed to `agent` plus every broadcast.
    pub async fn subscribe_agent<F>(&self, agent: AgentType, handler: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.subscribe(vec![Topic::Agent(agent), Topic::Broadcast], Arc::new(handler))
            .await
    }

    /// Receive every message of one type.
    pub async fn subscribe_to_type<F>(&self, message_type: MessageType, handler: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.subscribe(vec![Topic::Type(message_type)], Arc::new(handler))
            .await
    }

    async fn subscribe(&self, topics: Vec<Topic>, handler: Handler) -> Subscription {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        {
            let mut table = self.topics.write().await;
            for topic in &topics {
                table.insert(*topic, id, Arc::clone(&handler));
            }
        }
        debug!(subscription = id, topics = ?topics, "Subscribed");
        Subscription::new(id, topics, Arc::clone(&self.topics))
    }

    /// All retained messages of a run, oldest first.
    pub async fn get_history(&self, run_id: &str) -> Vec<Message> {
        self.history
            .read()
            .await
            .get(run_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages of a run sent by `agent` or addressed directly to it.
    pub async fn get_agent_messages(&self, run_id: &str, agent: AgentType) -> Vec<Message> {
        self.history
            .read()
            .await
            .get(run_id)
            .map(|ring| {
                ring.iter()
                    .filter(|m| m.source_agent == agent || m.target_agent == Some(agent))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Signals discovered during a run, in publish order.
    pub async fn get_signals(&self, run_id: &str) -> Vec<SignalPayload> {
        self.history
            .read()
            .await
            .get(run_id)
            .map(|ring| {
                ring.iter()
                    .filter(|m| m.message_type == MessageType::SignalDiscovered)
                    .filter_map(|m| match &m.payload {
                        MessagePayload::Signal(signal) => Some(signal.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop the retained messages of a finished run.
    ///
    /// Outstanding requests of the run are left alone; see
    /// [`MessageBus::cancel_run_requests`].
    pub async fn clear_history(&self, run_id: &str) {
        if self.history.write().await.remove(run_id).is_some() {
            debug!(run_id = %run_id, "Cleared message history");
        }
    }

    /// Reject every outstanding analysis request of a run with
    /// [`BusError::RunClosed`]. Returns how many were rejected.
    pub async fn cancel_run_requests(&self, run_id: &str) -> usize {
        self.pending.cancel_run(run_id).await
    }

    /// Number of requests still waiting for a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.len().await
    }

    /// Number of registered (topic, handler) pairs.
    pub async fn subscriber_count(&self) -> usize {
        self.topics.read().await.len()
    }
}

/// Build a high-priority `request_analysis` message under a fresh request id.
fn analysis_request(
    source: AgentType,
    target: AgentType,
    run_id: &str,
    question: String,
    context: serde_json::Value,
) -> (String, OutgoingMessage) {
    let request_id = format!("req_{}", Uuid::new_v4().simple());
    let request = OutgoingMessage::new(
        MessageType::RequestAnalysis,
        source,
        run_id,
        MessagePayload::AnalysisRequest {
            request_id: request_id.clone(),
            question,
            context,
        },
    )
    .to(target)
    .with_priority(Priority::High);
    (request_id, request)
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}
