//! Message data model — message kinds, payloads, and the envelope itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentType;

/// Kind of a bus message. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    SignalDiscovered,
    CompanyAnalyzed,
    JobMatched,
    InterviewScheduled,
    NegotiationAdvice,
    CareerInsight,
    RequestAnalysis,
    ResponseReady,
    ContextUpdate,
    UserAction,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignalDiscovered => "signal_discovered",
            Self::CompanyAnalyzed => "company_analyzed",
            Self::JobMatched => "job_matched",
            Self::InterviewScheduled => "interview_scheduled",
            Self::NegotiationAdvice => "negotiation_advice",
            Self::CareerInsight => "career_insight",
            Self::RequestAnalysis => "request_analysis",
            Self::ResponseReady => "response_ready",
            Self::ContextUpdate => "context_update",
            Self::UserAction => "user_action",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory priority. Delivery is always FIFO regardless of priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// A hiring-likelihood observation about a company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    /// Company the signal is about, as reported (not normalized).
    pub company: String,
    /// Signal category, e.g. `funding_round` or `headcount_growth`.
    pub signal_type: String,
    pub description: String,
    /// Strength of the signal, 0–100.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Message payload, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    /// A discovered signal.
    Signal(SignalPayload),
    /// Ask another agent for an analysis; answered through `respond_to_request`.
    AnalysisRequest {
        request_id: String,
        question: String,
        context: serde_json::Value,
    },
    /// Answer to an `AnalysisRequest`.
    AnalysisResponse {
        request_id: String,
        response: serde_json::Value,
        success: bool,
    },
    /// Anything else.
    Data { data: serde_json::Value },
}

impl MessagePayload {
    /// Opaque payload.
    pub fn data(data: serde_json::Value) -> Self {
        Self::Data { data }
    }

    /// Correlation id for request/response payloads.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::AnalysisRequest { request_id, .. } | Self::AnalysisResponse { request_id, .. } => {
                Some(request_id.as_str())
            }
            Self::Signal(_) | Self::Data { .. } => None,
        }
    }
}

/// A message as stored in history and delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub source_agent: AgentType,
    /// Direct delivery target; `None` means broadcast.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<AgentType>,
    pub payload: MessagePayload,
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub priority: Priority,
}

impl Message {
    pub fn is_broadcast(&self) -> bool {
        self.target_agent.is_none()
    }
}

/// A message before the bus assigns its id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub message_type: MessageType,
    pub source_agent: AgentType,
    pub target_agent: Option<AgentType>,
    pub payload: MessagePayload,
    pub run_id: String,
    pub conversation_id: Option<String>,
    pub priority: Priority,
}

impl OutgoingMessage {
    /// Create a broadcast message with normal priority.
    pub fn new(
        message_type: MessageType,
        source_agent: AgentType,
        run_id: impl Into<String>,
        payload: MessagePayload,
    ) -> Self {
        Self {
            message_type,
            source_agent,
            target_agent: None,
            payload,
            run_id: run_id.into(),
            conversation_id: None,
            priority: Priority::Normal,
        }
    }

    /// Address the message to a single agent.
    pub fn to(mut self, target: AgentType) -> Self {
        self.target_agent = Some(target);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn in_conversation(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    /// Stamp id and timestamp.
    pub(crate) fn into_message(self) -> Message {
        Message {
            id: format!("msg_{}", Uuid::new_v4().simple()),
            message_type: self.message_type,
            source_agent: self.source_agent,
            target_agent: self.target_agent,
            payload: self.payload,
            timestamp: Utc::now(),
            run_id: self.run_id,
            conversation_id: self.conversation_id,
            priority: self.priority,
        }
    }
}
