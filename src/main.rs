use std::sync::Arc;

use agent_coord::bus::{Message, MessagePayload, MessageType, SignalPayload};
use agent_coord::config::CoordinationConfig;
use agent_coord::knowledge::{CompanySignal, CompanyUpdate, Confidence};
use agent_coord::{AgentType, Coordinator};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    eprintln!("Agent Coord v{}", env!("CARGO_PKG_VERSION"));

    let coordinator = Coordinator::new(CoordinationConfig::default())?;
    let sweeper = coordinator.spawn_sweeper();

    // ── Career coach answers analysis requests ──────────────────────────
    let bus = Arc::clone(coordinator.bus());
    coordinator
        .bus()
        .subscribe_agent(AgentType::CareerCoach, move |message: &Message| {
            let MessagePayload::AnalysisRequest { request_id, question, context } = &message.payload
            else {
                return;
            };
            let bus = Arc::clone(&bus);
            let request_id = request_id.clone();
            let run_id = message.run_id.clone();
            let answer = json!({
                "question": question,
                "advice": "Reach out to the hiring manager this week.",
                "company": context.get("company").cloned().unwrap_or_default(),
            });
            tokio::spawn(async move {
                bus.respond_to_request(AgentType::CareerCoach, &request_id, &run_id, answer, true)
                    .await;
            });
        })
        .await;

    // ── One user turn ───────────────────────────────────────────────────
    let run = coordinator
        .start_run("demo-user", Some("demo-conversation".to_string()), None)
        .await;
    let knowledge = Arc::clone(run.knowledge());

    run.set_current_agent(AgentType::SignalScout).await;
    let scout = run.get_publisher().await?;

    let search_input = json!({ "query": "Acme", "country": "fi" });
    if !run.has_tool_cache("company_search", &search_input).await {
        run.record_tool_use(
            "company_search",
            &search_input,
            json!([{ "name": "Acme Oy", "employees": 120 }]),
            false,
        )
        .await;
    }

    scout
        .publish_signal(SignalPayload {
            company: "Acme".to_string(),
            signal_type: "funding_round".to_string(),
            description: "Closed a Series B".to_string(),
            strength: Some(75),
            source: Some("news".to_string()),
        })
        .await;
    knowledge
        .set_company_knowledge(
            run.run_id(),
            "Acme",
            CompanyUpdate {
                signal_score: Some(80),
                confidence: Some(Confidence::High),
                timing: Some("next quarter".to_string()),
                signals: Some(vec![CompanySignal::new("funding_round", "Closed a Series B")]),
                ..Default::default()
            },
            AgentType::SignalScout,
        )
        .await;

    let advice = scout
        .request_analysis(
            AgentType::CareerCoach,
            "Should the user apply to Acme now?",
            json!({ "company": "Acme" }),
        )
        .await?;

    run.set_current_agent(AgentType::CareerCoach).await;
    let coach = run.get_publisher().await?;
    knowledge
        .add_user_insight(run.run_id(), AgentType::CareerCoach, "preference", "Prefers growth-stage companies")
        .await;
    knowledge
        .add_recommendation(
            run.run_id(),
            AgentType::CareerCoach,
            "network",
            advice["advice"].as_str().unwrap_or("Reach out"),
            8,
        )
        .await;
    coach
        .publish(MessageType::CareerInsight, MessagePayload::data(advice))
        .await;
    run.complete_agent_execution().await;

    println!(
        "{}",
        knowledge
            .build_context_summary_for(run.run_id(), AgentType::CareerCoach)
            .await
    );
    println!();
    println!("{}", serde_json::to_string_pretty(&run.get_summary().await)?);

    coordinator.finish_run(run.run_id()).await;
    sweeper.abort();
    Ok(())
}
