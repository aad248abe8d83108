//! Pending analysis requests awaiting a response or a timeout.
//!
//! Both settlement paths (the responder and the timer) must remove the entry
//! from the registry to get hold of the one-shot sender, so a request can be
//! settled at most once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::agent::AgentType;
use crate::error::BusError;

/// Outcome delivered to the waiting requester.
pub(crate) type Outcome = Result<serde_json::Value, BusError>;

/// One outstanding request.
pub(crate) struct PendingRequest {
    /// Agent that asked; responses are addressed back to it.
    pub requester: AgentType,
    pub run_id: String,
    reply_tx: oneshot::Sender<Outcome>,
    timer: Option<JoinHandle<()>>,
}

impl PendingRequest {
    /// Stop the timer and hand the outcome to the requester.
    /// Returns `false` if the requester already went away.
    pub(crate) fn settle(mut self, outcome: Outcome) -> bool {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.reply_tx.send(outcome).is_ok()
    }
}

/// Registry of outstanding requests keyed by request id.
#[derive(Clone, Default)]
pub(crate) struct PendingRequests {
    entries: Arc<Mutex<HashMap<String, PendingRequest>>>,
}

impl PendingRequests {
    /// Register a request and arm its timeout.
    pub(crate) async fn register(
        &self,
        request_id: &str,
        requester: AgentType,
        run_id: &str,
        timeout: Duration,
    ) -> oneshot::Receiver<Outcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let mut entries = self.entries.lock().await;

        let timer = {
            let registry = Arc::clone(&self.entries);
            let request_id = request_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let expired = registry.lock().await.remove(&request_id);
                if let Some(mut entry) = expired {
                    // Our own handle; nothing to abort.
                    entry.timer.take();
                    warn!(
                        request_id = %request_id,
                        run_id = %entry.run_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Analysis request timed out"
                    );
                    let _ = entry.reply_tx.send(Err(BusError::Timeout {
                        request_id,
                        timeout,
                    }));
                }
            })
        };

        entries.insert(
            request_id.to_string(),
            PendingRequest {
                requester,
                run_id: run_id.to_string(),
                reply_tx,
                timer: Some(timer),
            },
        );
        reply_rx
    }

    /// Atomically remove a request so the caller may settle it.
    pub(crate) async fn take(&self, request_id: &str) -> Option<PendingRequest> {
        self.entries.lock().await.remove(request_id)
    }

    /// Reject every outstanding request of `run_id`. Returns how many were rejected.
    pub(crate) async fn cancel_run(&self, run_id: &str) -> usize {
        let cancelled: Vec<(String, PendingRequest)> = {
            let mut entries = self.entries.lock().await;
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.run_id == run_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let count = cancelled.len();
        for (request_id, entry) in cancelled {
            entry.settle(Err(BusError::RunClosed {
                request_id,
                run_id: run_id.to_string(),
            }));
        }
        if count > 0 {
            debug!(run_id = %run_id, count, "Cancelled pending analysis requests");
        }
        count
    }

    pub(crate) async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
