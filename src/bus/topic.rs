//! Typed delivery topics and subscription handles.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::model::{Message, MessageType};
use crate::agent::AgentType;

/// Callback invoked for every delivered message.
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Delivery channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Messages addressed directly to one agent.
    Agent(AgentType),
    /// Messages of one kind, whoever sent them or whoever they target.
    Type(MessageType),
    /// Untargeted messages.
    Broadcast,
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent(agent) => write!(f, "agent:{agent}"),
            Self::Type(kind) => write!(f, "type:{kind}"),
            Self::Broadcast => f.write_str("broadcast"),
        }
    }
}

/// Topic → registered handlers, in subscription order.
#[derive(Default)]
pub(crate) struct TopicTable {
    handlers: HashMap<Topic, Vec<(u64, Handler)>>,
}

impl TopicTable {
    pub(crate) fn insert(&mut self, topic: Topic, id: u64, handler: Handler) {
        self.handlers.entry(topic).or_default().push((id, handler));
    }

    /// Remove every handler registered under `id` on `topic`.
    pub(crate) fn remove(&mut self, topic: Topic, id: u64) {
        if let Some(list) = self.handlers.get_mut(&topic) {
            list.retain(|(sub_id, _)| *sub_id != id);
            if list.is_empty() {
                self.handlers.remove(&topic);
            }
        }
    }

    /// Clone out the handlers for `topic` so they can run without the lock.
    pub(crate) fn handlers_for(&self, topic: Topic) -> Vec<Handler> {
        self.handlers
            .get(&topic)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }
}

/// Handle returned by the `subscribe_*` calls.
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
pub struct Subscription {
    id: u64,
    topics: Vec<Topic>,
    table: Arc<RwLock<TopicTable>>,
}

impl Subscription {
    pub(crate) fn new(id: u64, topics: Vec<Topic>, table: Arc<RwLock<TopicTable>>) -> Self {
        Self { id, topics, table }
    }

    /// Topics this subscription listens on.
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// Stop receiving messages.
    pub async fn unsubscribe(self) {
        let mut table = self.table.write().await;
        for topic in &self.topics {
            table.remove(*topic, self.id);
        }
        debug!(subscription = self.id, "Unsubscribed");
    }
}
