use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info};

use tradegraph_core::error::{Result, TradegraphError};
use tradegraph_core::traits::ModelClient;
use tradegraph_core::types::{ChatMessage, Delta, ToolContext};
use tradegraph_graph::{Node, NodeContext, RoutedState, Turn};

use crate::agent::Agent;
use crate::prompts;
use crate::state::{DebateSide, Phase, Stance, WorkflowState};
use crate::tools::ToolRegistry;

type Ctx<'a> = NodeContext<'a, WorkflowState, Agent>;

/// Generic LLM-backed node; the agent decides prompt content and which
/// state fields the final turn is written to.
pub struct AgentNode {
    agent: Agent,
    model: Arc<dyn ModelClient>,
    tools: Arc<ToolRegistry>,
    max_tool_steps: usize,
}

impl AgentNode {
    pub fn new(
        agent: Agent,
        model: Arc<dyn ModelClient>,
        tools: Arc<ToolRegistry>,
        max_tool_steps: usize,
    ) -> Self {
        Self {
            agent,
            model,
            tools,
            max_tool_steps,
        }
    }

    pub fn agent(&self) -> Agent {
        self.agent
    }

    /// Build the outbound request from the state.
    pub fn prepare(&self, state: &WorkflowState) -> Vec<ChatMessage> {
        prompts::build_messages(self.agent, state)
    }

    /// Call the model, dispatching tool calls until it answers without one.
    async fn execute(
        &self,
        ctx: &Ctx<'_>,
        mut messages: Vec<ChatMessage>,
        tool_ctx: ToolContext,
    ) -> Result<Turn> {
        let defs = if self.agent.uses_tools() {
            self.tools.definitions()
        } else {
            vec![]
        };

        for step in 0..self.max_tool_steps {
            if ctx.is_cancelled() {
                return Err(TradegraphError::Cancelled);
            }
            debug!(node = %self.agent, step, "Invoking model");

            let mut agg = ctx.aggregator();
            let stream = tokio::select! {
                result = self.model.invoke(messages.clone(), &defs) => result?,
                _ = ctx.cancel_token().cancelled() => return Err(TradegraphError::Cancelled),
            };
            let turn = agg.consume(stream, ctx.cancel_token()).await?;

            if !turn.wants_tools() {
                return Ok(turn);
            }

            messages.push(
                ChatMessage::assistant_with_tools(turn.content.clone(), turn.tool_calls.clone())
                    .named(self.agent.as_str()),
            );
            for call in &turn.tool_calls {
                let result = self.tools.dispatch(call, tool_ctx.clone()).await;
                debug!(
                    node = %self.agent,
                    tool = %call.name,
                    is_error = result.is_error,
                    "Tool call complete"
                );
                agg.push(Delta::tool_result(call.id.clone(), result.content.clone()));
                messages.push(ChatMessage::tool_result(call.id.clone(), result.content));
            }
        }

        Err(TradegraphError::ToolLoopExceeded {
            node: self.agent.to_string(),
            steps: self.max_tool_steps,
        })
    }

    /// Write the final turn into the state and set the successor.
    fn route(&self, ctx: &Ctx<'_>, state: &mut WorkflowState, turn: &Turn) {
        let text = turn.content.trim();
        if !text.is_empty() {
            state.append_message(ChatMessage::assistant_text(text).named(self.agent.as_str()));
        }

        match self.agent {
            Agent::MarketAnalyst
            | Agent::SocialAnalyst
            | Agent::NewsAnalyst
            | Agent::FundamentalsAnalyst => {
                if let Some(kind) = self.agent.analyst_kind() {
                    state.set_report(kind, text);
                    state.mark_phase_complete(Phase::from(kind));
                }
            }
            Agent::BullResearcher => state.record_debate_turn(DebateSide::Bull, text),
            Agent::BearResearcher => state.record_debate_turn(DebateSide::Bear, text),
            Agent::ResearchManager => {
                state.set_investment_plan(text);
                state.mark_phase_complete(Phase::InvestmentDebate);
            }
            Agent::Trader => {
                state.set_trader_plan(text);
                state.mark_phase_complete(Phase::Trading);
            }
            Agent::RiskyAnalyst => state.record_risk_turn(Stance::Risky, text),
            Agent::SafeAnalyst => state.record_risk_turn(Stance::Safe, text),
            Agent::NeutralAnalyst => state.record_risk_turn(Stance::Neutral, text),
            Agent::RiskJudge => {
                state.set_final_decision(text);
                state.mark_phase_complete(Phase::RiskDebate);
                state.mark_complete();
            }
        }

        let next = ctx.next_route(state);
        state.set_route(next);
    }
}

impl Node<WorkflowState, Agent> for AgentNode {
    fn run<'a>(
        &'a self,
        ctx: &'a Ctx<'a>,
        state: &'a mut WorkflowState,
    ) -> BoxFuture<'a, Result<Turn>> {
        Box::pin(async move {
            let messages = self.prepare(state);
            let tool_ctx = ToolContext {
                subject_id: state.subject_id().to_string(),
                as_of: state.as_of().to_string(),
            };

            let turn = self.execute(ctx, messages, tool_ctx).await?;
            self.route(ctx, state, &turn);

            info!(
                node = %self.agent,
                chars = turn.content.len(),
                next = ?state.current_route().map(|r| r.to_string()),
                "Agent finished"
            );
            Ok(turn)
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use tradegraph_core::config::{AnalystKind, OrphanFragmentPolicy};
    use tradegraph_core::types::{FinishReason, Role, WorkflowEvent};
    use tradegraph_graph::{Emitter, Route};
    use tradegraph_test_utils::{ScriptedModel, StaticTool};

    use super::*;

    fn node(agent: Agent, model: ScriptedModel, tools: ToolRegistry, steps: usize) -> AgentNode {
        AgentNode::new(agent, Arc::new(model), Arc::new(tools), steps)
    }

    fn state() -> WorkflowState {
        WorkflowState::new("AAPL", "2024-06-03", "Evaluate AAPL", 1, 1)
    }

    #[tokio::test]
    async fn test_analyst_tool_loop_then_report() {
        let model = ScriptedModel::new(vec![
            vec![
                Delta::tool_call(Some("tc1"), Some("get_quote"), r#"{"symbol":"AAPL"}"#),
                Delta::finish(FinishReason::ToolCalls),
            ],
            vec![
                Delta::text("AAPL trades at 190."),
                Delta::finish(FinishReason::Stop),
            ],
        ]);
        let requests = model.requests();
        let mut tools = ToolRegistry::new();
        tools.register(StaticTool::new("get_quote", "190.12"));
        let n = node(Agent::MarketAnalyst, model, tools, 4);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let emitter = Emitter::new(tx);
        let cancel = CancellationToken::new();
        let key = Agent::MarketAnalyst;
        let ctx = NodeContext::new(&key, None, &emitter, &cancel, OrphanFragmentPolicy::default());

        let mut s = state();
        let turn = n.run(&ctx, &mut s).await.unwrap();
        assert_eq!(turn.content, "AAPL trades at 190.");
        assert_eq!(s.report(AnalystKind::Market), Some("AAPL trades at 190."));
        assert!(s.is_phase_complete(Phase::Market));
        assert_eq!(s.current_route(), Some(&Route::End));

        // Second request carries the assistant tool call and the tool result.
        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let second = &requests[1];
        assert_eq!(second[second.len() - 1].role, Role::Tool);
        assert_eq!(second[second.len() - 1].content, "190.12");

        let mut topics = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            topics.push(ev.topic());
            if let WorkflowEvent::ToolResultFinal { tool_call_id, .. } = &ev {
                assert_eq!(tool_call_id, "tc1");
            }
        }
        assert_eq!(
            topics,
            vec![
                "message_chunk",
                "text_final",
                "tool_call_result_final",
                "message_chunk",
                "text_final"
            ]
        );
    }

    #[tokio::test]
    async fn test_tool_loop_exceeded() {
        let looping: Vec<Vec<Delta>> = (0..3)
            .map(|i| {
                let id = format!("tc{i}");
                vec![
                    Delta::tool_call(Some(id.as_str()), Some("get_quote"), "{}"),
                    Delta::finish(FinishReason::ToolCalls),
                ]
            })
            .collect();
        let mut tools = ToolRegistry::new();
        tools.register(StaticTool::new("get_quote", "1"));
        let n = node(Agent::NewsAnalyst, ScriptedModel::new(looping), tools, 2);

        let emitter = Emitter::disabled();
        let cancel = CancellationToken::new();
        let key = Agent::NewsAnalyst;
        let ctx = NodeContext::new(&key, None, &emitter, &cancel, OrphanFragmentPolicy::default());

        let mut s = state();
        let err = n.run(&ctx, &mut s).await.unwrap_err();
        assert!(matches!(err, TradegraphError::ToolLoopExceeded { steps: 2, .. }));
        assert_eq!(s.route_writes(), 0);
    }

    #[tokio::test]
    async fn test_empty_response_still_routes() {
        let model = ScriptedModel::new(vec![vec![Delta::finish(FinishReason::Stop)]]);
        let n = node(Agent::BullResearcher, model, ToolRegistry::new(), 2);

        let emitter = Emitter::disabled();
        let cancel = CancellationToken::new();
        let key = Agent::BullResearcher;
        let ctx = NodeContext::new(&key, None, &emitter, &cancel, OrphanFragmentPolicy::default());

        let mut s = state();
        let turn = n.run(&ctx, &mut s).await.unwrap();
        assert!(turn.is_empty());
        assert_eq!(s.route_writes(), 1);
        assert_eq!(s.debate().count, 1);
        assert_eq!(s.history().len(), 1);
    }

    #[tokio::test]
    async fn test_judge_sets_final_decision() {
        let model = ScriptedModel::new(vec![vec![
            Delta::text("Recommendation: **BUY** with a tight stop."),
            Delta::finish(FinishReason::Stop),
        ]]);
        let n = node(Agent::RiskJudge, model, ToolRegistry::new(), 2);

        let emitter = Emitter::disabled();
        let cancel = CancellationToken::new();
        let key = Agent::RiskJudge;
        let ctx = NodeContext::new(&key, None, &emitter, &cancel, OrphanFragmentPolicy::default());

        let mut s = state();
        n.run(&ctx, &mut s).await.unwrap();
        assert_eq!(
            s.final_decision(),
            Some("Recommendation: **BUY** with a tight stop.")
        );
        assert!(s.is_complete());
        assert_eq!(s.history().last().and_then(|m| m.name.as_deref()), Some("risk_judge"));
    }
}
