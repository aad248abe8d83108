//! Run context — the execution scope of one user turn.
//!
//! Tracks which agents ran (each `set_current_agent` opens a fresh
//! [`AgentExecution`]; executions only ever go from running to completed or
//! failed, and a finished execution is never modified again),
//! caches tool results for the whole run, and hands out a publisher bound to
//! the current agent.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cache::{ToolCacheEntry, tool_cache_key};
use crate::agent::AgentType;
use crate::bus::{Message, MessageBus, MessagePayload, MessageType, OutgoingMessage, SignalPayload};
use crate::error::{BusError, ContextError};
use crate::knowledge::KnowledgeStore;

/// One stint of one agent inside a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentExecution {
    pub agent_type: AgentType,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Tools used during this execution, first use first, no duplicates.
    pub tools_used: Vec<String>,
    pub messages_published: u32,
    /// Why the execution failed; `None` for running or successful ones.
    pub error: Option<String>,
}

impl AgentExecution {
    fn new(agent_type: AgentType) -> Self {
        Self {
            agent_type,
            started_at: Utc::now(),
            completed_at: None,
            tools_used: Vec::new(),
            messages_published: 0,
            error: None,
        }
    }

    /// Whether the execution has finished, successfully or not.
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Mark completed. No-op if already finished.
    fn complete(&mut self) -> bool {
        if self.completed_at.is_some() {
            return false;
        }
        self.completed_at = Some(Utc::now());
        true
    }

    /// Mark failed with `reason`. No-op if already finished.
    fn fail(&mut self, reason: String) -> bool {
        if self.completed_at.is_some() {
            return false;
        }
        self.completed_at = Some(Utc::now());
        self.error = Some(reason);
        true
    }
}

/// Mutable part of a run context.
#[derive(Debug, Default)]
struct RunState {
    current_agent: Option<AgentType>,
    executions: Vec<AgentExecution>,
    /// Cache key → result; see [`super::cache`].
    tool_cache: HashMap<String, ToolCacheEntry>,
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl RunState {
    /// The execution of the current agent, if it is still running.
    fn current_execution_mut(&mut self) -> Option<&mut AgentExecution> {
        self.current_agent?;
        self.executions.last_mut().filter(|e| !e.is_completed())
    }
}

/// Point-in-time copy of a run context, for debugging surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct RunContextData {
    pub run_id: String,
    pub session_id: String,
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub current_agent: Option<AgentType>,
    pub executions: Vec<AgentExecution>,
    pub tool_cache: HashMap<String, ToolCacheEntry>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// What happened during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub duration: Duration,
    /// Agent of every execution in order, repeats included.
    pub agents: Vec<AgentType>,
    /// Union of the tools used by all executions, first use first.
    pub tools_used: Vec<String>,
    pub messages_published: u32,
    pub cached_tool_results: usize,
    /// Executions that finished successfully.
    pub agents_completed: usize,
    /// Executions that finished with an error.
    pub agents_failed: usize,
    /// Error of every failed execution, prefixed with its agent.
    pub errors: Vec<String>,
}

/// Execution scope of one user turn.
pub struct RunContext {
    run_id: String,
    session_id: String,
    user_id: String,
    conversation_id: Option<String>,
    started_at: DateTime<Utc>,
    /// Unix millis of the last activity; see [`RunContext::touch`].
    last_active: AtomicI64,
    bus: Arc<MessageBus>,
    knowledge: Arc<KnowledgeStore>,
    state: Arc<RwLock<RunState>>,
}

impl RunContext {
    /// Create a run context and its knowledge entry.
    ///
    /// Passing `existing_run_id` continues a run across turns of the same
    /// conversation: its knowledge is kept if it still exists.
    pub async fn new(
        bus: Arc<MessageBus>,
        knowledge: Arc<KnowledgeStore>,
        user_id: impl Into<String>,
        conversation_id: Option<String>,
        existing_run_id: Option<String>,
    ) -> Self {
        let user_id = user_id.into();
        let (run_id, resumed) = match existing_run_id {
            Some(run_id) => (run_id, true),
            None => (format!("run_{}", Uuid::new_v4().simple()), false),
        };

        if resumed {
            knowledge
                .get_or_init_run(&run_id, &user_id, conversation_id.clone())
                .await;
        } else {
            knowledge
                .init_run(&run_id, &user_id, conversation_id.clone())
                .await;
        }

        info!(run_id = %run_id, user_id = %user_id, resumed, "Run context created");

        let started_at = Utc::now();
        Self {
            run_id,
            session_id: format!("sess_{}", Uuid::new_v4().simple()),
            user_id,
            conversation_id,
            started_at,
            last_active: AtomicI64::new(started_at.timestamp_millis()),
            bus,
            knowledge,
            state: Arc::new(RwLock::new(RunState::default())),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the run last did something; the sweeper disposes runs by this.
    pub fn last_active(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_active.load(Ordering::Relaxed))
            .unwrap_or(self.started_at)
    }

    /// Record activity now. Called on agent switches and tool use, and when a
    /// live run is continued for another turn.
    pub fn touch(&self) {
        self.last_active
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// The bus this run publishes on.
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// The knowledge store holding this run's knowledge.
    pub fn knowledge(&self) -> &Arc<KnowledgeStore> {
        &self.knowledge
    }

    pub async fn current_agent(&self) -> Option<AgentType> {
        self.state.read().await.current_agent
    }

    /// Make `agent` the active agent.
    ///
    /// Completes the open execution (if any) and starts a new one, even when
    /// `agent` is the agent that was already active.
    pub async fn set_current_agent(&self, agent: AgentType) {
        let previous = {
            let mut state = self.state.write().await;
            let previous = state.current_agent;
            if let Some(open) = state.executions.last_mut() {
                open.complete();
            }
            state.executions.push(AgentExecution::new(agent));
            state.current_agent = Some(agent);
            previous
        };
        self.touch();

        self.knowledge.record_agent_involved(&self.run_id, agent).await;
        info!(run_id = %self.run_id, agent = %agent, previous = ?previous, "Agent activated");
    }

    /// Publisher stamped with the current agent.
    ///
    /// Fails with [`ContextError::NoActiveAgent`] before the first
    /// `set_current_agent`.
    pub async fn get_publisher(&self) -> Result<AgentPublisher, ContextError> {
        let state = self.state.read().await;
        let (Some(source), Some(execution)) =
            (state.current_agent, state.executions.len().checked_sub(1))
        else {
            return Err(ContextError::NoActiveAgent {
                run_id: self.run_id.clone(),
            });
        };

        Ok(AgentPublisher {
            bus: Arc::clone(&self.bus),
            state: Arc::clone(&self.state),
            source,
            run_id: self.run_id.clone(),
            conversation_id: self.conversation_id.clone(),
            execution,
        })
    }

    /// Cache a tool result for the rest of the run and note the tool against
    /// the current execution.
    pub async fn record_tool_use(
        &self,
        tool_name: &str,
        input: &serde_json::Value,
        output: serde_json::Value,
        cached: bool,
    ) {
        let key = tool_cache_key(tool_name, input);
        self.touch();
        let mut state = self.state.write().await;
        state.tool_cache.insert(
            key,
            ToolCacheEntry {
                output,
                timestamp: Utc::now(),
                cached,
            },
        );
        if let Some(execution) = state.current_execution_mut()
            && !execution.tools_used.iter().any(|t| t == tool_name)
        {
            execution.tools_used.push(tool_name.to_string());
        }
        debug!(run_id = %self.run_id, tool = %tool_name, cached, "Tool result recorded");
    }

    /// Previously recorded output for the same tool and input, from any agent
    /// of this run.
    pub async fn get_cached_tool_result(
        &self,
        tool_name: &str,
        input: &serde_json::Value,
    ) -> Option<serde_json::Value> {
        let key = tool_cache_key(tool_name, input);
        self.state
            .read()
            .await
            .tool_cache
            .get(&key)
            .map(|entry| entry.output.clone())
    }

    pub async fn has_tool_cache(&self, tool_name: &str, input: &serde_json::Value) -> bool {
        let key = tool_cache_key(tool_name, input);
        self.state.read().await.tool_cache.contains_key(&key)
    }

    /// Count a message published outside [`AgentPublisher`] against the
    /// current execution, if it is still running.
    pub async fn record_message_published(&self) {
        if let Some(execution) = self.state.write().await.current_execution_mut() {
            execution.messages_published += 1;
        }
    }

    /// Complete the current execution. Idempotent, and a no-op once the
    /// execution has failed.
    pub async fn complete_agent_execution(&self) {
        let completed = self
            .state
            .write()
            .await
            .current_execution_mut()
            .map(AgentExecution::complete)
            .unwrap_or(false);
        if completed {
            debug!(run_id = %self.run_id, "Agent execution completed");
        }
    }

    /// Fail the current execution with `reason`. No-op if there is no
    /// running execution.
    pub async fn fail_agent_execution(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut state = self.state.write().await;
        let agent = state.current_agent;
        let failed = state
            .current_execution_mut()
            .map(|execution| execution.fail(reason.clone()))
            .unwrap_or(false);
        if failed {
            warn!(run_id = %self.run_id, agent = ?agent, error = %reason, "Agent execution failed");
        }
    }

    pub async fn set_metadata(&self, key: impl Into<String>, value: serde_json::Value) {
        self.state.write().await.metadata.insert(key.into(), value);
    }

    pub async fn metadata(&self, key: &str) -> Option<serde_json::Value> {
        self.state.read().await.metadata.get(key).cloned()
    }

    /// Summary of the run so far.
    pub async fn get_summary(&self) -> RunSummary {
        let state = self.state.read().await;

        let mut tools_used: Vec<String> = Vec::new();
        for execution in &state.executions {
            for tool in &execution.tools_used {
                if !tools_used.contains(tool) {
                    tools_used.push(tool.clone());
                }
            }
        }

        RunSummary {
            run_id: self.run_id.clone(),
            duration: Utc::now()
                .signed_duration_since(self.started_at)
                .to_std()
                .unwrap_or_default(),
            agents: state.executions.iter().map(|e| e.agent_type).collect(),
            tools_used,
            messages_published: state.executions.iter().map(|e| e.messages_published).sum(),
            cached_tool_results: state.tool_cache.len(),
            agents_completed: state
                .executions
                .iter()
                .filter(|e| e.is_completed() && !e.is_failed())
                .count(),
            agents_failed: state.executions.iter().filter(|e| e.is_failed()).count(),
            errors: state
                .executions
                .iter()
                .filter_map(|e| e.error.as_ref().map(|err| format!("{}: {err}", e.agent_type)))
                .collect(),
        }
    }

    /// Point-in-time copy of the whole context.
    pub async fn snapshot(&self) -> RunContextData {
        let state = self.state.read().await;
        RunContextData {
            run_id: self.run_id.clone(),
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            conversation_id: self.conversation_id.clone(),
            started_at: self.started_at,
            current_agent: state.current_agent,
            executions: state.executions.clone(),
            tool_cache: state.tool_cache.clone(),
            metadata: state.metadata.clone(),
        }
    }

    /// Dispose of the run: complete the open execution, fail its outstanding
    /// analysis requests, and purge its bus history and knowledge.
    ///
    /// Irreversible. The global company cache is kept.
    pub async fn cleanup(&self) {
        self.complete_agent_execution().await;

        let cancelled = self.bus.cancel_run_requests(&self.run_id).await;
        self.bus.clear_history(&self.run_id).await;
        self.knowledge.clear_run(&self.run_id).await;

        info!(run_id = %self.run_id, cancelled_requests = cancelled, "Run cleaned up");
    }
}

/// Publishes on behalf of the agent that was current when it was handed out.
#[derive(Clone)]
pub struct AgentPublisher {
    bus: Arc<MessageBus>,
    state: Arc<RwLock<RunState>>,
    source: AgentType,
    run_id: String,
    conversation_id: Option<String>,
    /// Index of the execution publishes are counted against.
    execution: usize,
}

impl AgentPublisher {
    pub fn agent(&self) -> AgentType {
        self.source
    }

    /// Broadcast a message.
    pub async fn publish(&self, message_type: MessageType, payload: MessagePayload) -> Message {
        self.send(OutgoingMessage::new(message_type, self.source, &self.run_id, payload))
            .await
    }

    /// Send a message to one agent.
    pub async fn publish_to(
        &self,
        target: AgentType,
        message_type: MessageType,
        payload: MessagePayload,
    ) -> Message {
        self.send(OutgoingMessage::new(message_type, self.source, &self.run_id, payload).to(target))
            .await
    }

    /// Broadcast a discovered signal.
    pub async fn publish_signal(&self, signal: SignalPayload) -> Message {
        self.publish(MessageType::SignalDiscovered, MessagePayload::Signal(signal))
            .await
    }

    /// Ask `target` for an analysis, waiting up to the bus's request timeout.
    pub async fn request_analysis(
        &self,
        target: AgentType,
        question: impl Into<String>,
        context: serde_json::Value,
    ) -> Result<serde_json::Value, BusError> {
        self.count_publish().await;
        self.bus
            .request_analysis_in_conversation(
                self.source,
                target,
                &self.run_id,
                self.conversation_id.clone(),
                question,
                context,
            )
            .await
    }

    async fn send(&self, outgoing: OutgoingMessage) -> Message {
        let message = self
            .bus
            .publish(outgoing.in_conversation(self.conversation_id.clone()))
            .await;
        self.count_publish().await;
        message
    }

    /// Count against the bound execution unless it has already finished.
    async fn count_publish(&self) {
        if let Some(execution) = self.state.write().await.executions.get_mut(self.execution)
            && !execution.is_completed()
        {
            execution.messages_published += 1;
        }
    }
}
