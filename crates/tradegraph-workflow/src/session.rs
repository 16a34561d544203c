use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tradegraph_core::config::WorkflowConfig;
use tradegraph_core::error::{Result, TradegraphError};
use tradegraph_core::traits::{ModelClient, Notifier, SessionStore};
use tradegraph_core::types::{MessageRecord, SessionId, SessionStatus, WorkflowEvent};
use tradegraph_graph::{Executor, Plan, RunSummary};

use crate::agent::Agent;
use crate::pipeline::build_trading_plan;
use crate::signal::{extract_signal, Signal};
use crate::state::WorkflowState;
use crate::tools::ToolRegistry;

/// Everything a caller learns from one analysis run.
#[derive(Debug)]
pub struct RunReport {
    /// `None` when the store could not open a session.
    pub session_id: Option<SessionId>,
    pub status: SessionStatus,
    pub outcome: Result<RunSummary<Agent>>,
    pub state: WorkflowState,
    pub signal: Option<Signal>,
    pub persistence_warnings: usize,
}

/// Runs the trading pipeline with persistence and notifications.
///
/// The plan is compiled once and shared by every run started from this
/// session runner.
pub struct TradingSession {
    config: WorkflowConfig,
    plan: Arc<Plan<WorkflowState, Agent>>,
    executor: Executor,
    store: Arc<dyn SessionStore>,
    notifier: Arc<dyn Notifier>,
}

impl TradingSession {
    pub fn new(
        config: WorkflowConfig,
        model: Arc<dyn ModelClient>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let plan = Arc::new(build_trading_plan(&config, model, tools)?);
        let executor = Executor::new(config.max_iterations).with_orphan_policy(config.orphan_fragments);
        Ok(Self {
            config,
            plan,
            executor,
            store,
            notifier,
        })
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Fresh state for one run, with round ceilings from the config.
    pub fn new_state(&self, subject_id: &str, as_of: &str, prompt: &str) -> WorkflowState {
        WorkflowState::new(
            subject_id,
            as_of,
            prompt,
            self.config.max_debate_rounds,
            self.config.max_risk_rounds,
        )
    }

    /// Drive one run to completion with no way to cancel it.
    pub async fn run(&self, state: WorkflowState) -> RunReport {
        self.run_with_cancel(state, &CancellationToken::new()).await
    }

    /// Drive one run to completion, aborting when `cancel` fires.
    ///
    /// The token belongs to this run alone. Store failures never abort the
    /// run; they are logged and surfaced as `persistence_warning`
    /// notifications.
    pub async fn run_with_cancel(
        &self,
        mut state: WorkflowState,
        cancel: &CancellationToken,
    ) -> RunReport {
        let session_id = match self
            .store
            .create_session(state.subject_id(), state.as_of(), state.prompt())
            .await
        {
            Ok(sid) => Some(sid),
            Err(e) => {
                warn!(error = %e, "Failed to create session; continuing without persistence");
                self.notifier.notify(
                    "persistence_warning",
                    serde_json::json!({ "message": e.to_string() }),
                );
                None
            }
        };
        let mut warnings = usize::from(session_id.is_none());

        info!(
            session_id = ?session_id.as_ref().map(|s| s.to_string()),
            subject = %state.subject_id(),
            as_of = %state.as_of(),
            "Starting trading analysis"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_events(
            rx,
            self.store.clone(),
            self.notifier.clone(),
            session_id.clone(),
        ));

        let outcome = self
            .executor
            .stream(self.plan.as_ref(), &mut state, tx, cancel)
            .await;

        warnings += forwarder.await.unwrap_or_else(|e| {
            error!(error = %e, "Event forwarder panicked");
            0
        });

        let status = match &outcome {
            Ok(_) => SessionStatus::Completed,
            Err(TradegraphError::Cancelled) => SessionStatus::Cancelled,
            Err(_) => SessionStatus::Failed,
        };

        if let Some(sid) = &session_id {
            if let Err(e) = self.store.update_session_status(sid, status).await {
                warn!(session_id = %sid, error = %e, "Failed to update session status");
                self.notifier.notify(
                    "persistence_warning",
                    serde_json::json!({ "session_id": sid.0, "message": e.to_string() }),
                );
                warnings += 1;
            }
        }

        match &outcome {
            Ok(summary) => info!(
                iterations = summary.iterations,
                elapsed_ms = summary.elapsed_ms,
                "Trading analysis complete"
            ),
            Err(e) => error!(error = %e, status = status.as_str(), "Trading analysis failed"),
        }

        let signal = state.final_decision().map(extract_signal);
        RunReport {
            session_id,
            status,
            outcome,
            state,
            signal,
            persistence_warnings: warnings,
        }
    }
}

/// Persist final turns and forward every event to the notifier.
///
/// Returns the number of store writes that failed.
async fn forward_events(
    mut rx: mpsc::UnboundedReceiver<WorkflowEvent>,
    store: Arc<dyn SessionStore>,
    notifier: Arc<dyn Notifier>,
    session_id: Option<SessionId>,
) -> usize {
    let mut failures = 0;

    while let Some(event) = rx.recv().await {
        notifier.notify(event.topic(), with_session(event.payload(), &session_id));

        let (Some(sid), Some(record)) = (&session_id, MessageRecord::from_event(&event)) else {
            continue;
        };
        if let Err(e) = store.save_message(sid, record).await {
            failures += 1;
            warn!(session_id = %sid, error = %e, "Failed to persist message");
            let warning = WorkflowEvent::PersistenceWarning {
                message: e.to_string(),
            };
            notifier.notify(warning.topic(), with_session(warning.payload(), &session_id));
        }
    }

    failures
}

fn with_session(mut payload: serde_json::Value, session_id: &Option<SessionId>) -> serde_json::Value {
    if let (Some(sid), Some(obj)) = (session_id, payload.as_object_mut()) {
        obj.insert("session_id".into(), serde_json::Value::String(sid.0.clone()));
    }
    payload
}
