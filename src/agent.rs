//! Agent personas that can be active in a run and talk over the bus.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ContextError;

/// One of the fixed AI personas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Routes a user turn to the specialist agents.
    Orchestrator,
    /// Discovers hiring signals about companies.
    SignalScout,
    /// Produces company deep-dives.
    CompanyAnalyst,
    /// Matches the user against open roles.
    JobMatcher,
    /// Prepares the user for interviews.
    InterviewCoach,
    /// Advises on offers and compensation.
    NegotiationAdvisor,
    /// Long-term career guidance.
    CareerCoach,
}

impl AgentType {
    pub const ALL: [AgentType; 7] = [
        Self::Orchestrator,
        Self::SignalScout,
        Self::CompanyAnalyst,
        Self::JobMatcher,
        Self::InterviewCoach,
        Self::NegotiationAdvisor,
        Self::CareerCoach,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::SignalScout => "signal_scout",
            Self::CompanyAnalyst => "company_analyst",
            Self::JobMatcher => "job_matcher",
            Self::InterviewCoach => "interview_coach",
            Self::NegotiationAdvisor => "negotiation_advisor",
            Self::CareerCoach => "career_coach",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|agent| agent.as_str() == needle)
            .ok_or_else(|| ContextError::UnknownAgent(s.to_string()))
    }
}
