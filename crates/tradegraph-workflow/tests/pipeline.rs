use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tradegraph_core::config::{AnalystKind, WorkflowConfig};
use tradegraph_core::traits::SessionStore;
use tradegraph_core::types::{ChatMessage, Delta, FinishReason, Role, SessionStatus};
use tradegraph_test_utils::{
    FailingModel, MemoryStore, RecordingNotifier, ScriptedModel, StaticTool,
};
use tradegraph_workflow::{Agent, Phase, Signal, ToolRegistry, TradingSession};

/// Replies "<subject> | <persona>" to every agent; the judge also proposes SELL.
fn persona_model() -> ScriptedModel {
    ScriptedModel::replying(|msgs: &[ChatMessage]| {
        let system = &msgs[0].content;
        let persona = system.split('.').next().unwrap_or_default();
        let subject = system
            .split("Instrument: ")
            .nth(1)
            .and_then(|s| s.split('.').next())
            .unwrap_or("?");
        let text = if persona.contains("risk management judge") {
            format!("{subject} | {persona}. FINAL TRANSACTION PROPOSAL: **SELL**")
        } else {
            format!("{subject} | {persona}")
        };
        ScriptedModel::text_turn(&text)
    })
}

fn session_with(
    config: WorkflowConfig,
    model: ScriptedModel,
    tools: ToolRegistry,
) -> (TradingSession, Arc<MemoryStore>, Arc<RecordingNotifier>) {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let session = TradingSession::new(
        config,
        Arc::new(model),
        Arc::new(tools),
        store.clone(),
        notifier.clone(),
    )
    .unwrap();
    (session, store, notifier)
}

#[tokio::test]
async fn full_pipeline_visits_every_agent_in_order() {
    let (session, store, notifier) =
        session_with(WorkflowConfig::default(), persona_model(), ToolRegistry::new());

    let report = session
        .run(session.new_state("AAPL", "2024-06-03", "Should we trade AAPL?"))
        .await;

    let summary = report.outcome.as_ref().unwrap();
    assert_eq!(
        summary.visited,
        vec![
            Agent::MarketAnalyst,
            Agent::SocialAnalyst,
            Agent::NewsAnalyst,
            Agent::FundamentalsAnalyst,
            Agent::BullResearcher,
            Agent::BearResearcher,
            Agent::ResearchManager,
            Agent::Trader,
            Agent::RiskyAnalyst,
            Agent::SafeAnalyst,
            Agent::NeutralAnalyst,
            Agent::RiskJudge,
        ]
    );
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.signal, Some(Signal::Sell));
    assert_eq!(report.persistence_warnings, 0);

    let state = &report.state;
    assert!(state.is_complete());
    for phase in [
        Phase::Market,
        Phase::Social,
        Phase::News,
        Phase::Fundamentals,
        Phase::InvestmentDebate,
        Phase::Trading,
        Phase::RiskDebate,
    ] {
        assert!(state.is_phase_complete(phase), "{phase:?} not complete");
    }
    assert_eq!(
        state.report(AnalystKind::News),
        Some("AAPL | You are a news researcher")
    );
    assert_eq!(state.debate().count, 2);
    assert_eq!(state.risk().count, 3);
    // Seed prompt plus one message per agent.
    assert_eq!(state.history().len(), 13);

    let sid = report.session_id.unwrap();
    let saved = store.load_messages(&sid).await.unwrap();
    assert_eq!(saved.len(), 12);
    let seqs: Vec<u64> = saved.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, (1..=12).collect::<Vec<u64>>());
    let agents: Vec<&str> = saved.iter().map(|m| m.record.agent.as_str()).collect();
    assert_eq!(agents.first(), Some(&"market_analyst"));
    assert_eq!(agents.last(), Some(&"risk_judge"));
    assert_eq!(store.session(&sid).unwrap().status, SessionStatus::Completed);

    let topics = notifier.topics();
    assert_eq!(topics.first().map(String::as_str), Some("run_start"));
    assert_eq!(topics.last().map(String::as_str), Some("finished"));
    assert_eq!(topics.iter().filter(|t| *t == "text_final").count(), 12);
    assert!(!topics.iter().any(|t| t == "error"));
}

#[tokio::test]
async fn round_ceilings_bound_both_debates() {
    let config = WorkflowConfig {
        analysts: vec![AnalystKind::Market],
        max_debate_rounds: 2,
        max_risk_rounds: 2,
        ..Default::default()
    };
    let (session, _store, _notifier) = session_with(config, persona_model(), ToolRegistry::new());

    let report = session.run(session.new_state("TSLA", "2024-06-03", "")).await;
    let visited = report.outcome.unwrap().visited;
    assert_eq!(
        visited,
        vec![
            Agent::MarketAnalyst,
            Agent::BullResearcher,
            Agent::BearResearcher,
            Agent::BullResearcher,
            Agent::BearResearcher,
            Agent::ResearchManager,
            Agent::Trader,
            Agent::RiskyAnalyst,
            Agent::SafeAnalyst,
            Agent::NeutralAnalyst,
            Agent::RiskyAnalyst,
            Agent::SafeAnalyst,
            Agent::NeutralAnalyst,
            Agent::RiskJudge,
        ]
    );
}

#[tokio::test]
async fn model_failure_marks_session_failed() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let session = TradingSession::new(
        WorkflowConfig::default(),
        Arc::new(FailingModel::new("HTTP 503")),
        Arc::new(ToolRegistry::new()),
        store.clone(),
        notifier.clone(),
    )
    .unwrap();

    let report = session.run(session.new_state("AAPL", "2024-06-03", "")).await;
    assert!(report.outcome.as_ref().is_err_and(|e| e.is_invocation()));
    assert_eq!(report.status, SessionStatus::Failed);
    assert_eq!(report.signal, None);

    let events = notifier.events();
    let errors: Vec<_> = events.iter().filter(|(t, _)| t == "error").collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].1["node"], "market_analyst");
    assert!(!events.iter().any(|(t, _)| t == "finished"));

    let sid = report.session_id.unwrap();
    assert_eq!(store.session(&sid).unwrap().status, SessionStatus::Failed);
}

#[tokio::test]
async fn cancelled_run_is_recorded_as_cancelled() {
    let (session, store, notifier) =
        session_with(WorkflowConfig::default(), persona_model(), ToolRegistry::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = session
        .run_with_cancel(session.new_state("AAPL", "2024-06-03", ""), &cancel)
        .await;
    assert_eq!(report.status, SessionStatus::Cancelled);
    assert!(report.state.report(AnalystKind::Market).is_none());

    let sid = report.session_id.unwrap();
    assert_eq!(store.session(&sid).unwrap().status, SessionStatus::Cancelled);
    assert_eq!(notifier.topics(), vec!["run_start", "error"]);
}

#[tokio::test]
async fn analyst_tool_turns_are_persisted_in_order() {
    let model = ScriptedModel::replying(|msgs: &[ChatMessage]| {
        let is_market = msgs[0].content.starts_with("You are a market analyst");
        let has_tool_result = msgs.iter().any(|m| m.role == Role::Tool);
        if is_market && !has_tool_result {
            vec![
                Delta::text("Fetching prices."),
                Delta::tool_call(Some("call_1"), Some("get_quote"), r#"{"symbol":"#),
                Delta::tool_call(None, None, r#""AAPL"}"#),
                Delta::finish(FinishReason::ToolCalls),
            ]
        } else {
            ScriptedModel::text_turn("done")
        }
    });
    let mut tools = ToolRegistry::new();
    tools.register(StaticTool::new("get_quote", "AAPL 191.20"));

    let config = WorkflowConfig {
        analysts: vec![AnalystKind::Market],
        ..Default::default()
    };
    let (session, store, notifier) = session_with(config, model, tools);

    let report = session.run(session.new_state("AAPL", "2024-06-03", "")).await;
    assert!(report.outcome.is_ok());

    let saved = store.load_messages(&report.session_id.unwrap()).await.unwrap();
    let first_three: Vec<(Role, &str)> = saved
        .iter()
        .take(3)
        .map(|m| (m.record.role, m.record.content.as_str()))
        .collect();
    assert_eq!(
        first_three,
        vec![
            (Role::Assistant, "Fetching prices."),
            (Role::Tool, "AAPL 191.20"),
            (Role::Assistant, "done"),
        ]
    );
    assert_eq!(saved[0].record.tool_calls[0].arguments, r#"{"symbol":"AAPL"}"#);
    assert_eq!(saved[0].record.finish_reason.as_deref(), Some("tool_calls"));
    assert_eq!(saved[1].record.tool_call_id.as_deref(), Some("call_1"));

    assert_eq!(
        notifier
            .topics()
            .iter()
            .filter(|t| *t == "tool_call_result_final")
            .count(),
        1
    );
}

#[tokio::test]
async fn concurrent_runs_share_plan_without_leaking_state() {
    let (session, _store, _notifier) =
        session_with(WorkflowConfig::default(), persona_model(), ToolRegistry::new());

    let (a, b) = tokio::join!(
        session.run(session.new_state("AAPL", "2024-06-03", "")),
        session.run(session.new_state("MSFT", "2024-06-03", "")),
    );

    for (report, subject) in [(&a, "AAPL"), (&b, "MSFT")] {
        assert!(report.outcome.is_ok());
        let state = &report.state;
        assert_eq!(state.debate().count, 2);
        assert_eq!(state.risk().count, 3);
        assert!(state
            .history()
            .iter()
            .skip(1)
            .all(|m| m.content.starts_with(subject)));
        assert!(state.debate().history.contains(subject));
    }
    assert_ne!(a.session_id, b.session_id);
}

#[tokio::test]
async fn cancelling_one_run_leaves_concurrent_and_later_runs_alone() {
    let (session, store, _notifier) =
        session_with(WorkflowConfig::default(), persona_model(), ToolRegistry::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (stopped, finished) = tokio::join!(
        session.run_with_cancel(session.new_state("AAPL", "2024-06-03", ""), &cancel),
        session.run(session.new_state("MSFT", "2024-06-03", "")),
    );
    assert_eq!(stopped.status, SessionStatus::Cancelled);
    assert_eq!(finished.status, SessionStatus::Completed);
    assert_eq!(finished.outcome.as_ref().unwrap().iterations, 12);

    let later = session.run(session.new_state("NVDA", "2024-06-04", "")).await;
    assert_eq!(later.status, SessionStatus::Completed);
    let sid = later.session_id.unwrap();
    assert_eq!(store.session(&sid).unwrap().status, SessionStatus::Completed);
}

#[tokio::test]
async fn zero_round_ceilings_skip_both_debates() {
    let config = WorkflowConfig {
        analysts: vec![AnalystKind::Market],
        max_debate_rounds: 0,
        max_risk_rounds: 0,
        ..Default::default()
    };
    let (session, _store, _notifier) = session_with(config, persona_model(), ToolRegistry::new());

    let report = session.run(session.new_state("AAPL", "2024-06-03", "")).await;
    let summary = report.outcome.as_ref().unwrap();
    assert_eq!(
        summary.visited,
        vec![
            Agent::MarketAnalyst,
            Agent::ResearchManager,
            Agent::Trader,
            Agent::RiskJudge,
        ]
    );
    assert_eq!(report.state.debate().count, 0);
    assert_eq!(report.state.risk().count, 0);
    assert_eq!(report.signal, Some(Signal::Sell));
}
