//! Knowledge store — per-run knowledge tables plus a process-wide company cache.
//!
//! Lock order is always `runs` before `companies`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::model::{
    CompanyKnowledge, CompanyUpdate, ContextUpdate, Recommendation, RunKnowledge, UserInsight,
    normalize_company_name,
};
use super::summary;
use crate::agent::AgentType;
use crate::config::KnowledgeConfig;

/// Shared knowledge for all runs in the process.
pub struct KnowledgeStore {
    config: KnowledgeConfig,
    runs: RwLock<HashMap<String, RunKnowledge>>,
    /// Normalized company name → latest record from any run.
    companies: RwLock<HashMap<String, CompanyKnowledge>>,
    next_sequence: AtomicU64,
}

impl KnowledgeStore {
    /// Create a new store.
    pub fn new(config: KnowledgeConfig) -> Self {
        Self {
            config,
            runs: RwLock::new(HashMap::new()),
            companies: RwLock::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &KnowledgeConfig {
        &self.config
    }

    /// Create an empty knowledge entry for a run, replacing any previous one,
    /// then evict the oldest runs if the table is over capacity.
    pub async fn init_run(
        &self,
        run_id: &str,
        user_id: &str,
        conversation_id: Option<String>,
    ) -> RunKnowledge {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let run = RunKnowledge::new(run_id, user_id, conversation_id, sequence);

        let mut runs = self.runs.write().await;
        if runs.insert(run_id.to_string(), run.clone()).is_some() {
            debug!(run_id = %run_id, "Re-initialized run knowledge");
        }
        self.evict_oldest(&mut runs);
        run
    }

    /// Return the run's knowledge, creating it if missing.
    pub async fn get_or_init_run(
        &self,
        run_id: &str,
        user_id: &str,
        conversation_id: Option<String>,
    ) -> RunKnowledge {
        if let Some(run) = self.get_run(run_id).await {
            return run;
        }

        let mut runs = self.runs.write().await;
        // Another task may have created it between the read and the write.
        if let Some(run) = runs.get(run_id) {
            return run.clone();
        }
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let run = RunKnowledge::new(run_id, user_id, conversation_id, sequence);
        runs.insert(run_id.to_string(), run.clone());
        self.evict_oldest(&mut runs);
        run
    }

    fn evict_oldest(&self, runs: &mut HashMap<String, RunKnowledge>) {
        while runs.len() > self.config.max_runs {
            let oldest = runs
                .values()
                .min_by_key(|r| (r.started_at, r.sequence))
                .map(|r| r.run_id.clone());
            match oldest {
                Some(run_id) => {
                    runs.remove(&run_id);
                    info!(run_id = %run_id, max_runs = self.config.max_runs, "Evicted oldest run knowledge");
                }
                None => break,
            }
        }
    }

    /// Snapshot of a run's knowledge.
    pub async fn get_run(&self, run_id: &str) -> Option<RunKnowledge> {
        self.runs.read().await.get(run_id).cloned()
    }

    /// Number of runs currently held.
    pub async fn run_count(&self) -> usize {
        self.runs.read().await.len()
    }

    /// Drop a run's knowledge. The global company cache is untouched.
    pub async fn clear_run(&self, run_id: &str) -> bool {
        let removed = self.runs.write().await.remove(run_id).is_some();
        if removed {
            debug!(run_id = %run_id, "Cleared run knowledge");
        }
        removed
    }

    /// Merge `update` into the company's record and write the result to both
    /// the run and the global cache.
    ///
    /// The prior record is the run's own if present, else the global cache's.
    /// Returns `None` if the run does not exist.
    pub async fn set_company_knowledge(
        &self,
        run_id: &str,
        company_name: &str,
        update: CompanyUpdate,
        source_agent: AgentType,
    ) -> Option<CompanyKnowledge> {
        let key = normalize_company_name(company_name);
        let mut runs = self.runs.write().await;
        let Some(run) = runs.get_mut(run_id) else {
            warn!(run_id = %run_id, company = %key, "Company update for unknown run ignored");
            return None;
        };

        let prior = match run.companies.get(&key) {
            Some(local) => Some(local.clone()),
            None => self.companies.read().await.get(&key).cloned(),
        };
        let merged = update.apply(prior, company_name.trim(), source_agent);

        run.companies.insert(key.clone(), merged.clone());
        self.companies.write().await.insert(key.clone(), merged.clone());

        debug!(
            run_id = %run_id,
            company = %key,
            agent = %source_agent,
            "Company knowledge updated"
        );
        Some(merged)
    }

    /// Look a company up in the run first, then in the global cache.
    ///
    /// Global entries older than `max_cache_age` count as a miss but stay cached.
    pub async fn get_company_knowledge(
        &self,
        run_id: &str,
        company_name: &str,
    ) -> Option<CompanyKnowledge> {
        let key = normalize_company_name(company_name);

        let local = self
            .runs
            .read()
            .await
            .get(run_id)
            .and_then(|run| run.companies.get(&key).cloned());
        if local.is_some() {
            return local;
        }

        let companies = self.companies.read().await;
        companies
            .get(&key)
            .filter(|company| is_fresh(company, self.config.max_cache_age))
            .cloned()
    }

    /// Whether any run analyzed the company within `max_age`.
    pub async fn was_recently_analyzed(&self, company_name: &str, max_age: Duration) -> bool {
        let key = normalize_company_name(company_name);
        self.companies
            .read()
            .await
            .get(&key)
            .is_some_and(|company| is_fresh(company, max_age))
    }

    /// Number of entries in the global company cache, stale ones included.
    pub async fn cached_company_count(&self) -> usize {
        self.companies.read().await.len()
    }

    /// Append a timestamped insight. Returns `false` if the run does not exist.
    pub async fn add_user_insight(
        &self,
        run_id: &str,
        source_agent: AgentType,
        insight_type: impl Into<String>,
        content: impl Into<String>,
    ) -> bool {
        let mut runs = self.runs.write().await;
        let Some(run) = runs.get_mut(run_id) else {
            return false;
        };
        run.insights.push(UserInsight {
            insight_type: insight_type.into(),
            content: content.into(),
            source_agent,
            timestamp: Utc::now(),
        });
        true
    }

    /// Insights of a run, oldest first.
    pub async fn get_user_insights(&self, run_id: &str) -> Vec<UserInsight> {
        self.runs
            .read()
            .await
            .get(run_id)
            .map(|run| run.insights.clone())
            .unwrap_or_default()
    }

    /// Add a recommendation, keeping the list sorted by descending priority.
    /// Equal priorities keep their insertion order.
    pub async fn add_recommendation(
        &self,
        run_id: &str,
        source_agent: AgentType,
        recommendation_type: impl Into<String>,
        content: impl Into<String>,
        priority: i32,
    ) -> Option<Recommendation> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(run_id)?;

        let rec = Recommendation::new(source_agent, recommendation_type, content, priority);
        run.recommendations.push(rec.clone());
        // `sort_by` is stable.
        run.recommendations
            .sort_by(|a, b| b.priority.cmp(&a.priority));
        Some(rec)
    }

    /// The `limit` highest-priority recommendations.
    pub async fn get_recommendations(&self, run_id: &str, limit: usize) -> Vec<Recommendation> {
        self.runs
            .read()
            .await
            .get(run_id)
            .map(|run| run.recommendations.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Merge into the run's context bag. Returns `false` if the run does not exist.
    pub async fn update_context(&self, run_id: &str, update: ContextUpdate) -> bool {
        let mut runs = self.runs.write().await;
        match runs.get_mut(run_id) {
            Some(run) => {
                update.apply_to(&mut run.context);
                true
            }
            None => false,
        }
    }

    /// Add an agent to the run's path if it is not there yet.
    pub async fn record_agent_involved(&self, run_id: &str, agent: AgentType) -> bool {
        let mut runs = self.runs.write().await;
        match runs.get_mut(run_id) {
            Some(run) => run.context.record_agent(agent),
            None => false,
        }
    }

    /// Structured digest of everything the run knows; empty for unknown runs.
    pub async fn build_context_summary(&self, run_id: &str) -> String {
        match self.runs.read().await.get(run_id) {
            Some(run) => summary::render(run),
            None => String::new(),
        }
    }

    /// [`KnowledgeStore::build_context_summary`] plus the section relevant to
    /// `agent`; empty for unknown runs.
    pub async fn build_context_summary_for(&self, run_id: &str, agent: AgentType) -> String {
        match self.runs.read().await.get(run_id) {
            Some(run) => summary::render_for(run, agent),
            None => String::new(),
        }
    }
}

impl Default for KnowledgeStore {
    fn default() -> Self {
        Self::new(KnowledgeConfig::default())
    }
}

fn is_fresh(company: &CompanyKnowledge, max_age: Duration) -> bool {
    let age = Utc::now().signed_duration_since(company.last_analyzed);
    match chrono::Duration::from_std(max_age) {
        Ok(max_age) => age < max_age,
        // Longer than chrono can represent: never stale.
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::model::Confidence;

    fn score(signal_score: u8) -> CompanyUpdate {
        CompanyUpdate {
            signal_score: Some(signal_score),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn init_and_get_run() {
        let store = KnowledgeStore::default();
        let run = store.init_run("run_1", "user_1", Some("conv_1".into())).await;
        assert_eq!(run.user_id, "user_1");

        let fetched = store.get_run("run_1").await.unwrap();
        assert_eq!(fetched.conversation_id.as_deref(), Some("conv_1"));
        assert!(store.get_run("run_2").await.is_none());
    }

    #[tokio::test]
    async fn get_or_init_is_idempotent() {
        let store = KnowledgeStore::default();
        store.init_run("run_1", "user_1", None).await;
        store.add_user_insight("run_1", AgentType::CareerCoach, "goal", "lead a team").await;

        let run = store.get_or_init_run("run_1", "someone_else", None).await;
        assert_eq!(run.user_id, "user_1");
        assert_eq!(run.insights.len(), 1);
        assert_eq!(store.run_count().await, 1);
    }

    #[tokio::test]
    async fn evicts_oldest_run_past_capacity() {
        let store = KnowledgeStore::new(KnowledgeConfig {
            max_runs: 3,
            ..Default::default()
        });
        for i in 0..4 {
            store.init_run(&format!("run_{i}"), "user_1", None).await;
        }

        assert_eq!(store.run_count().await, 3);
        assert!(store.get_run("run_0").await.is_none());
        assert!(store.get_run("run_3").await.is_some());
    }

    #[tokio::test]
    async fn case_and_whitespace_variants_merge() {
        let store = KnowledgeStore::default();
        store.init_run("run_1", "user_1", None).await;

        let first = store
            .set_company_knowledge("run_1", "Acme", score(80), AgentType::SignalScout)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store
            .set_company_knowledge("run_1", "acme ", score(85), AgentType::SignalScout)
            .await
            .unwrap();

        assert!(second.last_analyzed > first.last_analyzed);
        assert_eq!(second.analyzed_by, vec![AgentType::SignalScout]);

        let run = store.get_run("run_1").await.unwrap();
        assert_eq!(run.companies.len(), 1);
        assert_eq!(run.companies["acme"].signal_score, Some(85));
    }

    #[tokio::test]
    async fn another_agent_reads_what_one_wrote() {
        let store = KnowledgeStore::default();
        store.init_run("run_1", "user_1", None).await;

        store
            .set_company_knowledge(
                "run_1",
                "Acme",
                CompanyUpdate {
                    signal_score: Some(80),
                    confidence: Some(Confidence::High),
                    ..Default::default()
                },
                AgentType::SignalScout,
            )
            .await;

        let company = store.get_company_knowledge("run_1", "acme").await.unwrap();
        assert_eq!(company.signal_score, Some(80));
        assert_eq!(company.confidence, Some(Confidence::High));
    }

    #[tokio::test]
    async fn global_cache_serves_other_runs() {
        let store = KnowledgeStore::default();
        store.init_run("run_1", "user_1", None).await;
        store.init_run("run_2", "user_2", None).await;
        store
            .set_company_knowledge("run_1", "Acme", score(70), AgentType::SignalScout)
            .await;

        let cached = store.get_company_knowledge("run_2", "ACME").await.unwrap();
        assert_eq!(cached.signal_score, Some(70));
        assert!(store.get_run("run_2").await.unwrap().companies.is_empty());

        // A write in run_2 builds on the cached record.
        let merged = store
            .set_company_knowledge(
                "run_2",
                "Acme",
                CompanyUpdate {
                    industry: Some("logistics".into()),
                    ..Default::default()
                },
                AgentType::CompanyAnalyst,
            )
            .await
            .unwrap();
        assert_eq!(merged.signal_score, Some(70));
        assert_eq!(
            merged.analyzed_by,
            vec![AgentType::SignalScout, AgentType::CompanyAnalyst]
        );
    }

    #[tokio::test]
    async fn stale_global_entries_are_misses_but_kept() {
        let store = KnowledgeStore::new(KnowledgeConfig {
            max_cache_age: Duration::from_millis(10),
            ..Default::default()
        });
        store.init_run("run_1", "user_1", None).await;
        store.init_run("run_2", "user_1", None).await;
        store
            .set_company_knowledge("run_1", "Acme", score(50), AgentType::SignalScout)
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.get_company_knowledge("run_2", "acme").await.is_none());
        // The run that wrote it still sees its own copy.
        assert!(store.get_company_knowledge("run_1", "acme").await.is_some());
        assert_eq!(store.cached_company_count().await, 1);
    }

    #[tokio::test]
    async fn recently_analyzed_checks_global_cache() {
        let store = KnowledgeStore::default();
        store.init_run("run_1", "user_1", None).await;
        assert!(!store.was_recently_analyzed("Acme", Duration::from_secs(60)).await);

        store
            .set_company_knowledge("run_1", "Acme", score(50), AgentType::SignalScout)
            .await;
        assert!(store.was_recently_analyzed(" acme", Duration::from_secs(60)).await);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!store.was_recently_analyzed("acme", Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn unknown_run_writes_nothing() {
        let store = KnowledgeStore::default();
        let result = store
            .set_company_knowledge("missing", "Acme", score(10), AgentType::SignalScout)
            .await;
        assert!(result.is_none());
        assert_eq!(store.cached_company_count().await, 0);
        assert!(!store.add_user_insight("missing", AgentType::CareerCoach, "goal", "x").await);
    }

    #[tokio::test]
    async fn recommendations_sorted_and_stable() {
        let store = KnowledgeStore::default();
        store.init_run("run_1", "user_1", None).await;
        for (content, priority) in [("a", 5), ("b", 9), ("c", 5), ("d", 1), ("e", 9)] {
            store
                .add_recommendation("run_1", AgentType::JobMatcher, "apply", content, priority)
                .await;
        }

        let recs = store.get_recommendations("run_1", 10).await;
        let order: Vec<&str> = recs.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(order, vec!["b", "e", "a", "c", "d"]);

        let top = store.get_recommendations("run_1", 2).await;
        assert_eq!(top.len(), 2);
        assert_eq!(top[1].content, "e");
    }

    #[tokio::test]
    async fn insights_are_appended_in_order() {
        let store = KnowledgeStore::default();
        store.init_run("run_1", "user_1", None).await;
        store.add_user_insight("run_1", AgentType::CareerCoach, "skill", "rust").await;
        store.add_user_insight("run_1", AgentType::InterviewCoach, "skill", "sql").await;

        let insights = store.get_user_insights("run_1").await;
        assert_eq!(insights.len(), 2);
        assert_eq!(insights[0].content, "rust");
        assert_eq!(insights[1].source_agent, AgentType::InterviewCoach);
    }

    #[tokio::test]
    async fn context_and_agent_path() {
        let store = KnowledgeStore::default();
        store.init_run("run_1", "user_1", None).await;

        store
            .update_context(
                "run_1",
                ContextUpdate {
                    current_company: Some("Acme".into()),
                    ..Default::default()
                },
            )
            .await;
        store.record_agent_involved("run_1", AgentType::SignalScout).await;
        store.record_agent_involved("run_1", AgentType::CareerCoach).await;
        store.record_agent_involved("run_1", AgentType::SignalScout).await;

        let context = store.get_run("run_1").await.unwrap().context;
        assert_eq!(context.current_company.as_deref(), Some("Acme"));
        assert_eq!(
            context.agent_path,
            vec![AgentType::SignalScout, AgentType::CareerCoach]
        );
    }

    #[tokio::test]
    async fn clear_run_keeps_global_cache() {
        let store = KnowledgeStore::default();
        store.init_run("run_1", "user_1", None).await;
        store
            .set_company_knowledge("run_1", "Acme", score(50), AgentType::SignalScout)
            .await;

        assert!(store.clear_run("run_1").await);
        assert!(!store.clear_run("run_1").await);
        assert!(store.get_run("run_1").await.is_none());
        assert_eq!(store.build_context_summary("run_1").await, "");
        assert!(store.was_recently_analyzed("acme", Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn summary_lists_companies() {
        let store = KnowledgeStore::default();
        store.init_run("run_1", "user_1", None).await;
        store
            .set_company_knowledge("run_1", "Acme", score(80), AgentType::SignalScout)
            .await;

        let text = store.build_context_summary("run_1").await;
        assert!(text.starts_with(summary::COMPANIES_HEADER));
        assert!(text.contains("Acme"));
    }

    #[tokio::test]
    async fn summary_for_agent_adds_its_section() {
        let store = KnowledgeStore::default();
        store.init_run("run_1", "user_1", None).await;
        store
            .set_company_knowledge("run_1", "Acme", score(80), AgentType::SignalScout)
            .await;

        let plain = store.build_context_summary("run_1").await;
        let analyst = store
            .build_context_summary_for("run_1", AgentType::CompanyAnalyst)
            .await;
        assert!(analyst.starts_with(&plain));
        assert!(analyst.contains(summary::SCORES_HEADER));
        assert_eq!(
            store.build_context_summary_for("run_2", AgentType::CareerCoach).await,
            ""
        );
    }
}
