//! Registry of live run contexts, so a sweeper or a debug surface can list
//! them or force their disposal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::context::RunContext;

/// Live run contexts keyed by run id.
#[derive(Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<String, Arc<RunContext>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a run. A run already registered under the same id is replaced
    /// without being cleaned up.
    pub async fn register_run(&self, run: Arc<RunContext>) {
        let run_id = run.run_id().to_string();
        if self.runs.write().await.insert(run_id.clone(), run).is_some() {
            warn!(run_id = %run_id, "Run registered twice; previous handle replaced");
        } else {
            debug!(run_id = %run_id, "Run registered");
        }
    }

    /// Stop tracking a run and clean it up. Returns `false` if it was not registered.
    pub async fn unregister_run(&self, run_id: &str) -> bool {
        let removed = self.runs.write().await.remove(run_id);
        match removed {
            Some(run) => {
                run.cleanup().await;
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, run_id: &str) -> Option<Arc<RunContext>> {
        self.runs.read().await.get(run_id).cloned()
    }

    /// All live runs, oldest first.
    pub async fn get_active_runs(&self) -> Vec<Arc<RunContext>> {
        let mut runs: Vec<Arc<RunContext>> = self.runs.read().await.values().cloned().collect();
        runs.sort_by_key(|run| run.started_at());
        runs
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }

    /// Dispose of every run with no activity for more than `max_age`.
    /// Returns how many were disposed.
    pub async fn sweep_stale(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            warn!(?max_age, "Sweep skipped: max age out of range");
            return 0;
        };
        let cutoff = Utc::now() - max_age;

        let stale: Vec<Arc<RunContext>> = {
            let mut runs = self.runs.write().await;
            let ids: Vec<String> = runs
                .values()
                .filter(|run| run.last_active() < cutoff)
                .map(|run| run.run_id().to_string())
                .collect();
            ids.iter().filter_map(|id| runs.remove(id)).collect()
        };

        let count = stale.len();
        join_all(stale.iter().map(|run| run.cleanup())).await;
        if count > 0 {
            info!(count, "Swept stale runs");
        }
        count
    }
}

/// Spawn a background task that periodically disposes of stale runs.
pub fn spawn_sweeper(
    registry: Arc<RunRegistry>,
    interval: Duration,
    max_age: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            registry.sweep_stale(max_age).await;
        }
    })
}
