//! Coordinator — the one bus, knowledge store and run registry of the process,
//! built together from a single configuration and handed to the orchestrator.

use std::sync::Arc;

use tracing::info;

use crate::bus::MessageBus;
use crate::config::CoordinationConfig;
use crate::error::Result;
use crate::knowledge::KnowledgeStore;
use crate::run::{RunContext, RunRegistry, spawn_sweeper};

/// Process-wide coordination services.
pub struct Coordinator {
    config: CoordinationConfig,
    bus: Arc<MessageBus>,
    knowledge: Arc<KnowledgeStore>,
    runs: Arc<RunRegistry>,
}

impl Coordinator {
    /// Build the services. Fails if the configuration is invalid.
    pub fn new(config: CoordinationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            bus: Arc::new(MessageBus::new(config.bus.clone())),
            knowledge: Arc::new(KnowledgeStore::new(config.knowledge.clone())),
            runs: Arc::new(RunRegistry::new()),
            config,
        })
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeStore> {
        &self.knowledge
    }

    pub fn runs(&self) -> &Arc<RunRegistry> {
        &self.runs
    }

    /// Start (or continue) a run for one user turn and register it.
    ///
    /// If `existing_run_id` names a live run, that run is returned with its
    /// activity refreshed, so the sweeper measures idleness per turn.
    pub async fn start_run(
        &self,
        user_id: impl Into<String>,
        conversation_id: Option<String>,
        existing_run_id: Option<String>,
    ) -> Arc<RunContext> {
        if let Some(run_id) = existing_run_id.as_deref()
            && let Some(live) = self.runs.get(run_id).await
        {
            live.touch();
            return live;
        }

        let run = Arc::new(
            RunContext::new(
                Arc::clone(&self.bus),
                Arc::clone(&self.knowledge),
                user_id,
                conversation_id,
                existing_run_id,
            )
            .await,
        );
        self.runs.register_run(Arc::clone(&run)).await;
        run
    }

    /// Unregister and dispose of a run. Returns `false` if it was not live.
    pub async fn finish_run(&self, run_id: &str) -> bool {
        self.runs.unregister_run(run_id).await
    }

    /// Start the background sweeper for abandoned runs.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        info!(
            interval_secs = self.config.runs.sweep_interval.as_secs(),
            max_age_secs = self.config.runs.max_run_age.as_secs(),
            "Starting run sweeper"
        );
        spawn_sweeper(
            Arc::clone(&self.runs),
            self.config.runs.sweep_interval,
            self.config.runs.max_run_age,
        )
    }
}
