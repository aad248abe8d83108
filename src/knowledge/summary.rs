//! Plain-text digest of a run's knowledge, embedded into agent prompts.
//!
//! Sections appear in a fixed order and are omitted when empty:
//! companies, user insights (last 5), top recommendations (top 3), and the
//! agent path (only when more than one agent took part). [`render_for`]
//! appends one section tailored to the agent that will read it.

use std::fmt::Write;

use super::model::{CompanyKnowledge, RunKnowledge};
use crate::agent::AgentType;

pub const COMPANIES_HEADER: &str = "## Companies analyzed";
pub const INSIGHTS_HEADER: &str = "## User insights";
pub const RECOMMENDATIONS_HEADER: &str = "## Top recommendations";
pub const AGENT_PATH_HEADER: &str = "## Agent path";

pub const UNSIGNALED_HEADER: &str = "## Companies without signals";
pub const SCORES_HEADER: &str = "## Signal scores";
pub const OPPORTUNITIES_HEADER: &str = "## Past opportunities";
pub const FOCUS_HEADER: &str = "## Current focus";
pub const OVERVIEW_HEADER: &str = "## Overview";

/// Insight type counted by the job matcher's section.
pub const OPPORTUNITY_INSIGHT: &str = "opportunity";

const SIGNALS_PER_COMPANY: usize = 3;
const RECENT_INSIGHTS: usize = 5;
const TOP_RECOMMENDATIONS: usize = 3;
const SCORES_SHOWN: usize = 5;

/// Render the digest for one run.
pub fn render(run: &RunKnowledge) -> String {
    let mut sections: Vec<String> = Vec::new();

    if !run.companies.is_empty() {
        let mut companies: Vec<(&String, &CompanyKnowledge)> = run.companies.iter().collect();
        companies.sort_by(|a, b| a.0.cmp(b.0));

        let mut out = String::from(COMPANIES_HEADER);
        for (_, company) in companies {
            let _ = write!(out, "\n- {}", company.name);
            let mut facts = Vec::new();
            if let Some(score) = company.signal_score {
                facts.push(format!("signal score {score}"));
            }
            if let Some(confidence) = company.confidence {
                facts.push(format!("confidence {confidence}"));
            }
            if !facts.is_empty() {
                let _ = write!(out, " ({})", facts.join(", "));
            }
            for signal in company.signals.iter().take(SIGNALS_PER_COMPANY) {
                let _ = write!(out, "\n  - {}: {}", signal.signal_type, signal.description);
            }
        }
        sections.push(out);
    }

    if !run.insights.is_empty() {
        let start = run.insights.len().saturating_sub(RECENT_INSIGHTS);
        let mut out = String::from(INSIGHTS_HEADER);
        for insight in &run.insights[start..] {
            let _ = write!(out, "\n- [{}] {}", insight.insight_type, insight.content);
        }
        sections.push(out);
    }

    if !run.recommendations.is_empty() {
        let mut out = String::from(RECOMMENDATIONS_HEADER);
        for rec in run.recommendations.iter().take(TOP_RECOMMENDATIONS) {
            let _ = write!(
                out,
                "\n- ({}) {}: {}",
                rec.priority, rec.recommendation_type, rec.content
            );
        }
        sections.push(out);
    }

    if run.context.agent_path.len() > 1 {
        let path: Vec<&str> = run.context.agent_path.iter().map(|a| a.as_str()).collect();
        sections.push(format!("{AGENT_PATH_HEADER}\n{}", path.join(" -> ")));
    }

    sections.join("\n\n")
}

/// Render the digest followed by the section relevant to `agent`.
pub fn render_for(run: &RunKnowledge, agent: AgentType) -> String {
    let base = render(run);
    match agent_section(run, agent) {
        Some(extra) if base.is_empty() => extra,
        Some(extra) => format!("{base}\n\n{extra}"),
        None => base,
    }
}

fn agent_section(run: &RunKnowledge, agent: AgentType) -> Option<String> {
    match agent {
        AgentType::SignalScout => {
            let count = run.companies.values().filter(|c| c.signals.is_empty()).count();
            (count > 0).then(|| format!("{UNSIGNALED_HEADER}: {count}"))
        }
        AgentType::CompanyAnalyst => {
            let mut companies: Vec<(&String, &CompanyKnowledge)> = run.companies.iter().collect();
            companies.sort_by(|a, b| a.0.cmp(b.0));
            let scores: Vec<u8> = companies.iter().filter_map(|(_, c)| c.signal_score).collect();
            if scores.is_empty() {
                return None;
            }
            let average = scores.iter().map(|s| f64::from(*s)).sum::<f64>() / scores.len() as f64;
            let shown: Vec<String> = scores.iter().take(SCORES_SHOWN).map(u8::to_string).collect();
            Some(format!(
                "{SCORES_HEADER}: {}\nAverage: {average:.1}",
                shown.join(", ")
            ))
        }
        AgentType::JobMatcher => {
            let count = run
                .insights
                .iter()
                .filter(|i| i.insight_type == OPPORTUNITY_INSIGHT)
                .count();
            (count > 0).then(|| format!("{OPPORTUNITIES_HEADER}: {count}"))
        }
        AgentType::InterviewCoach | AgentType::NegotiationAdvisor => run
            .context
            .current_company
            .as_ref()
            .map(|company| format!("{FOCUS_HEADER}: {company}")),
        AgentType::CareerCoach => {
            let mut out = String::from(OVERVIEW_HEADER);
            let _ = write!(out, "\n- Companies analyzed: {}", run.companies.len());
            let _ = write!(out, "\n- Recommendations: {}", run.recommendations.len());
            if let Some(intent) = &run.context.user_intent {
                let _ = write!(out, "\n- User intent: {intent}");
            }
            Some(out)
        }
        AgentType::Orchestrator => None,
    }
}
