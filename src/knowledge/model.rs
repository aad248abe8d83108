//! Knowledge data model — companies, insights, recommendations, and the
//! per-run context bag.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentType;

/// Merge key for company records: trimmed and lowercased.
pub fn normalize_company_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Confidence in a company assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{s}")
    }
}

/// A hiring signal attached to a company record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanySignal {
    pub signal_type: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl CompanySignal {
    pub fn new(signal_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            signal_type: signal_type.into(),
            description: description.into(),
            strength: None,
            source: None,
        }
    }
}

/// A news item about a company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// Everything known about one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyKnowledge {
    /// Display name, as last reported (trimmed).
    pub name: String,
    pub business_id: Option<String>,
    pub industry: Option<String>,
    /// Hiring likelihood, 0–100.
    pub signal_score: Option<u8>,
    pub confidence: Option<Confidence>,
    /// Free-form hiring timing estimate, e.g. "next quarter".
    pub timing: Option<String>,
    pub signals: Vec<CompanySignal>,
    pub news_items: Vec<NewsItem>,
    pub twitter_signals: u32,
    pub last_analyzed: DateTime<Utc>,
    /// Agents that contributed, first contribution first, no duplicates.
    pub analyzed_by: Vec<AgentType>,
}

impl CompanyKnowledge {
    /// Empty record for a company nobody has analyzed yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            business_id: None,
            industry: None,
            signal_score: None,
            confidence: None,
            timing: None,
            signals: Vec::new(),
            news_items: Vec::new(),
            twitter_signals: 0,
            last_analyzed: Utc::now(),
            analyzed_by: Vec::new(),
        }
    }
}

/// Partial company update. `Some` overwrites the prior value, `None` keeps it.
///
/// List fields are replaced wholesale when supplied, never concatenated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyUpdate {
    pub business_id: Option<String>,
    pub industry: Option<String>,
    pub signal_score: Option<u8>,
    pub confidence: Option<Confidence>,
    pub timing: Option<String>,
    pub signals: Option<Vec<CompanySignal>>,
    pub news_items: Option<Vec<NewsItem>>,
    pub twitter_signals: Option<u32>,
}

impl CompanyUpdate {
    /// Merge this update over `prior`, stamping `last_analyzed` and recording
    /// `source` as a contributor.
    pub fn apply(self, prior: Option<CompanyKnowledge>, name: &str, source: AgentType) -> CompanyKnowledge {
        let mut merged = prior.unwrap_or_else(|| CompanyKnowledge::new(name));
        merged.name = name.to_string();

        if let Some(business_id) = self.business_id {
            merged.business_id = Some(business_id);
        }
        if let Some(industry) = self.industry {
            merged.industry = Some(industry);
        }
        if let Some(score) = self.signal_score {
            merged.signal_score = Some(score);
        }
        if let Some(confidence) = self.confidence {
            merged.confidence = Some(confidence);
        }
        if let Some(timing) = self.timing {
            merged.timing = Some(timing);
        }
        if let Some(signals) = self.signals {
            merged.signals = signals;
        }
        if let Some(news_items) = self.news_items {
            merged.news_items = news_items;
        }
        if let Some(count) = self.twitter_signals {
            merged.twitter_signals = count;
        }

        merged.last_analyzed = Utc::now();
        if !merged.analyzed_by.contains(&source) {
            merged.analyzed_by.push(source);
        }
        merged
    }
}

/// Something learned about the user during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInsight {
    /// Category, e.g. `preference`, `skill`, `goal`.
    pub insight_type: String,
    pub content: String,
    pub source_agent: AgentType,
    pub timestamp: DateTime<Utc>,
}

/// A suggested next step for the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub source_agent: AgentType,
    /// Category, e.g. `apply`, `network`, `prepare`.
    pub recommendation_type: String,
    pub content: String,
    /// Higher comes first.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

impl Recommendation {
    pub fn new(
        source_agent: AgentType,
        recommendation_type: impl Into<String>,
        content: impl Into<String>,
        priority: i32,
    ) -> Self {
        Self {
            id: format!("rec_{}", Uuid::new_v4().simple()),
            source_agent,
            recommendation_type: recommendation_type.into(),
            content: content.into(),
            priority,
            created_at: Utc::now(),
        }
    }
}

/// Conversational state shared by the agents of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContextBag {
    pub current_topic: Option<String>,
    pub current_company: Option<String>,
    pub user_intent: Option<String>,
    /// Agents in order of first involvement, no duplicates.
    pub agent_path: Vec<AgentType>,
    /// Anything else an agent wants to share.
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl RunContextBag {
    /// Append `agent` to the path unless it is already there.
    pub fn record_agent(&mut self, agent: AgentType) -> bool {
        if self.agent_path.contains(&agent) {
            return false;
        }
        self.agent_path.push(agent);
        true
    }
}

/// Partial context update; same `Some`-overwrites rule as [`CompanyUpdate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdate {
    pub current_topic: Option<String>,
    pub current_company: Option<String>,
    pub user_intent: Option<String>,
    /// Merged key by key into the bag's attributes.
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl ContextUpdate {
    pub(crate) fn apply_to(self, bag: &mut RunContextBag) {
        if let Some(topic) = self.current_topic {
            bag.current_topic = Some(topic);
        }
        if let Some(company) = self.current_company {
            bag.current_company = Some(company);
        }
        if let Some(intent) = self.user_intent {
            bag.user_intent = Some(intent);
        }
        bag.attributes.extend(self.attributes);
    }
}

/// Knowledge accumulated during one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunKnowledge {
    pub run_id: String,
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Normalized company name → record.
    pub companies: HashMap<String, CompanyKnowledge>,
    pub insights: Vec<UserInsight>,
    /// Sorted by descending priority, insertion order on ties.
    pub recommendations: Vec<Recommendation>,
    pub context: RunContextBag,
    /// Creation order; breaks `started_at` ties during eviction.
    #[serde(skip)]
    pub(crate) sequence: u64,
}

impl RunKnowledge {
    pub(crate) fn new(
        run_id: impl Into<String>,
        user_id: impl Into<String>,
        conversation_id: Option<String>,
        sequence: u64,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            user_id: user_id.into(),
            conversation_id,
            started_at: Utc::now(),
            companies: HashMap::new(),
            insights: Vec::new(),
            recommendations: Vec::new(),
            context: RunContextBag::default(),
            sequence,
        }
    }
}
