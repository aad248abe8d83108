//! End-to-end tests for the coordination core.
//!
//! Each test builds a fresh `Coordinator` and drives bus, knowledge store and
//! run contexts together the way an orchestrator would.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use agent_coord::bus::{Message, MessagePayload, MessageType, SignalPayload};
use agent_coord::config::CoordinationConfig;
use agent_coord::error::BusError;
use agent_coord::knowledge::{CompanyUpdate, ContextUpdate};
use agent_coord::{AgentType, Coordinator};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn coordinator() -> Coordinator {
    Coordinator::new(CoordinationConfig::default()).unwrap()
}

fn signal(company: &str) -> SignalPayload {
    SignalPayload {
        company: company.to_string(),
        signal_type: "funding_round".to_string(),
        description: "Closed a Series B".to_string(),
        strength: Some(70),
        source: None,
    }
}

/// Subscribe `agent` and answer every analysis request addressed to it.
async fn answer_requests(coordinator: &Coordinator, agent: AgentType, success: bool) {
    let bus = Arc::clone(coordinator.bus());
    coordinator
        .bus()
        .subscribe_agent(agent, move |message: &Message| {
            let MessagePayload::AnalysisRequest { request_id, question, .. } = &message.payload
            else {
                return;
            };
            let bus = Arc::clone(&bus);
            let request_id = request_id.clone();
            let run_id = message.run_id.clone();
            let answer = json!({ "answered": question });
            tokio::spawn(async move {
                bus.respond_to_request(agent, &request_id, &run_id, answer, success)
                    .await;
            });
        })
        .await;
}

#[tokio::test]
async fn agents_share_signals_and_company_knowledge() {
    timeout(TEST_TIMEOUT, async {
        let coordinator = coordinator();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        coordinator
            .bus()
            .subscribe_agent(AgentType::CompanyAnalyst, move |message: &Message| {
                if let MessagePayload::Signal(signal) = &message.payload {
                    sink.lock().unwrap().push(signal.company.clone());
                }
            })
            .await;

        let run = coordinator.start_run("user_1", None, None).await;
        run.set_current_agent(AgentType::SignalScout).await;
        let scout = run.get_publisher().await.unwrap();
        scout.publish_signal(signal("Acme")).await;
        run.knowledge()
            .set_company_knowledge(
                run.run_id(),
                "  Acme ",
                CompanyUpdate {
                    signal_score: Some(80),
                    ..Default::default()
                },
                AgentType::SignalScout,
            )
            .await
            .unwrap();

        run.set_current_agent(AgentType::CompanyAnalyst).await;
        let company = run
            .knowledge()
            .get_company_knowledge(run.run_id(), "ACME")
            .await
            .unwrap();
        assert_eq!(company.name, "Acme");
        assert_eq!(company.signal_score, Some(80));
        assert_eq!(company.analyzed_by, vec![AgentType::SignalScout]);

        assert_eq!(*seen.lock().unwrap(), vec!["Acme".to_string()]);
        assert_eq!(coordinator.bus().get_signals(run.run_id()).await.len(), 1);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn request_analysis_round_trip() {
    timeout(TEST_TIMEOUT, async {
        let coordinator = coordinator();
        answer_requests(&coordinator, AgentType::CareerCoach, true).await;

        let run = coordinator.start_run("user_1", None, None).await;
        run.set_current_agent(AgentType::JobMatcher).await;
        let matcher = run.get_publisher().await.unwrap();

        let answer = matcher
            .request_analysis(AgentType::CareerCoach, "Is this a fit?", json!({}))
            .await
            .unwrap();
        assert_eq!(answer, json!({ "answered": "Is this a fit?" }));

        // Request to the coach, then the response back to the matcher. The
        // response is recorded right after the requester is released.
        let mut history = coordinator.bus().get_history(run.run_id()).await;
        while history.len() < 2 {
            tokio::task::yield_now().await;
            history = coordinator.bus().get_history(run.run_id()).await;
        }
        let kinds: Vec<MessageType> = history.iter().map(|m| m.message_type).collect();
        assert_eq!(kinds, vec![MessageType::RequestAnalysis, MessageType::ResponseReady]);
        assert_eq!(history[1].target_agent, Some(AgentType::JobMatcher));
        assert_eq!(coordinator.bus().pending_count().await, 0);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn rejected_request_carries_response() {
    timeout(TEST_TIMEOUT, async {
        let coordinator = coordinator();
        answer_requests(&coordinator, AgentType::NegotiationAdvisor, false).await;

        let run = coordinator.start_run("user_1", None, None).await;
        let err = coordinator
            .bus()
            .request_analysis(
                AgentType::Orchestrator,
                AgentType::NegotiationAdvisor,
                run.run_id(),
                "Counter offer?",
                json!({}),
            )
            .await
            .unwrap_err();
        match err {
            BusError::Rejected { response, .. } => {
                assert_eq!(response, json!({ "answered": "Counter offer?" }));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn unanswered_request_times_out() {
    timeout(TEST_TIMEOUT, async {
        let coordinator = coordinator();
        let run = coordinator.start_run("user_1", None, None).await;

        let err = coordinator
            .bus()
            .request_analysis_with_timeout(
                AgentType::Orchestrator,
                AgentType::InterviewCoach,
                run.run_id(),
                "Prep questions?",
                json!({}),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(coordinator.bus().pending_count().await, 0);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn finishing_a_run_fails_its_pending_requests() {
    timeout(TEST_TIMEOUT, async {
        let coordinator = coordinator();
        let run = coordinator.start_run("user_1", None, None).await;
        run.set_current_agent(AgentType::Orchestrator).await;
        let publisher = run.get_publisher().await.unwrap();

        let waiting = tokio::spawn(async move {
            publisher
                .request_analysis(AgentType::CompanyAnalyst, "Deep dive?", json!({}))
                .await
        });
        while coordinator.bus().pending_count().await == 0 {
            tokio::task::yield_now().await;
        }

        assert!(coordinator.finish_run(run.run_id()).await);
        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, BusError::RunClosed { .. }));
        assert!(coordinator.bus().get_history(run.run_id()).await.is_empty());
        assert!(coordinator.knowledge().get_run(run.run_id()).await.is_none());
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn company_cache_outlives_the_run() {
    timeout(TEST_TIMEOUT, async {
        let coordinator = coordinator();
        let first = coordinator.start_run("user_1", None, None).await;
        coordinator
            .knowledge()
            .set_company_knowledge(
                first.run_id(),
                "Acme",
                CompanyUpdate {
                    industry: Some("software".to_string()),
                    ..Default::default()
                },
                AgentType::CompanyAnalyst,
            )
            .await
            .unwrap();
        coordinator.finish_run(first.run_id()).await;

        let second = coordinator.start_run("user_2", None, None).await;
        let cached = coordinator
            .knowledge()
            .get_company_knowledge(second.run_id(), "acme")
            .await
            .unwrap();
        assert_eq!(cached.industry.as_deref(), Some("software"));
        assert!(
            coordinator
                .knowledge()
                .was_recently_analyzed("ACME", Duration::from_secs(60))
                .await
        );
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn tool_results_are_shared_between_agents() {
    timeout(TEST_TIMEOUT, async {
        let coordinator = coordinator();
        let run = coordinator.start_run("user_1", None, None).await;

        run.set_current_agent(AgentType::SignalScout).await;
        run.record_tool_use(
            "company_search",
            &json!({ "query": "Acme", "country": "fi" }),
            json!(["Acme Oy"]),
            false,
        )
        .await;

        run.set_current_agent(AgentType::CompanyAnalyst).await;
        let hit = run
            .get_cached_tool_result("company_search", &json!({ "country": "fi", "query": "Acme" }))
            .await;
        assert_eq!(hit, Some(json!(["Acme Oy"])));

        let summary = run.get_summary().await;
        assert_eq!(summary.agents, vec![AgentType::SignalScout, AgentType::CompanyAnalyst]);
        assert_eq!(summary.tools_used, vec!["company_search".to_string()]);
        assert_eq!(summary.cached_tool_results, 1);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn context_summary_reflects_the_turn() {
    timeout(TEST_TIMEOUT, async {
        let coordinator = coordinator();
        let run = coordinator.start_run("user_1", None, None).await;
        let knowledge = Arc::clone(run.knowledge());

        run.set_current_agent(AgentType::SignalScout).await;
        knowledge
            .set_company_knowledge(
                run.run_id(),
                "Acme",
                CompanyUpdate {
                    signal_score: Some(75),
                    ..Default::default()
                },
                AgentType::SignalScout,
            )
            .await;
        run.set_current_agent(AgentType::CareerCoach).await;
        knowledge
            .add_user_insight(run.run_id(), AgentType::CareerCoach, "goal", "Wants a remote role")
            .await;
        knowledge
            .add_recommendation(run.run_id(), AgentType::CareerCoach, "apply", "Apply to Acme", 9)
            .await;
        knowledge
            .update_context(
                run.run_id(),
                ContextUpdate {
                    current_company: Some("Acme".to_string()),
                    ..Default::default()
                },
            )
            .await;

        let summary = knowledge.build_context_summary(run.run_id()).await;
        assert!(summary.contains("## Companies analyzed"));
        assert!(summary.contains("Acme"));
        assert!(summary.contains("Wants a remote role"));
        assert!(summary.contains("Apply to Acme"));
        assert!(summary.contains("signal_scout -> career_coach"));
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn continuing_a_finished_run_reinitializes_its_knowledge() {
    timeout(TEST_TIMEOUT, async {
        let coordinator = coordinator();
        let run = coordinator
            .start_run("user_1", Some("conv_1".to_string()), None)
            .await;
        let run_id = run.run_id().to_string();
        coordinator
            .knowledge()
            .add_user_insight(&run_id, AgentType::CareerCoach, "goal", "Lead a team")
            .await;
        coordinator.finish_run(&run_id).await;

        let resumed = coordinator
            .start_run("user_1", Some("conv_1".to_string()), Some(run_id.clone()))
            .await;
        assert_eq!(resumed.run_id(), run_id);
        assert!(coordinator.knowledge().get_run(&run_id).await.is_some());
        assert!(coordinator.knowledge().get_user_insights(&run_id).await.is_empty());
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn failed_agent_is_reported_and_the_turn_goes_on() {
    timeout(TEST_TIMEOUT, async {
        let coordinator = coordinator();
        let run = coordinator.start_run("user_1", None, None).await;
        let knowledge = Arc::clone(run.knowledge());

        run.set_current_agent(AgentType::SignalScout).await;
        knowledge
            .set_company_knowledge(
                run.run_id(),
                "Acme",
                CompanyUpdate {
                    signal_score: Some(60),
                    ..Default::default()
                },
                AgentType::SignalScout,
            )
            .await;

        run.set_current_agent(AgentType::CompanyAnalyst).await;
        run.fail_agent_execution("business registry unavailable").await;

        run.set_current_agent(AgentType::CareerCoach).await;
        let coach_view = knowledge
            .build_context_summary_for(run.run_id(), AgentType::CareerCoach)
            .await;
        assert!(coach_view.contains("## Overview"));
        assert!(coach_view.contains("- Companies analyzed: 1"));
        run.complete_agent_execution().await;

        let summary = run.get_summary().await;
        assert_eq!(summary.agents_completed, 2);
        assert_eq!(summary.agents_failed, 1);
        assert_eq!(
            summary.errors,
            vec!["company_analyst: business registry unavailable".to_string()]
        );
    })
    .await
    .unwrap();
}
