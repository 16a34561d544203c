use std::sync::Arc;

use tracing::info;

use tradegraph_core::config::{AnalystKind, WorkflowConfig};
use tradegraph_core::error::{Result, TradegraphError};
use tradegraph_core::traits::ModelClient;
use tradegraph_graph::{GraphBuilder, Plan, Route};

use crate::agent::Agent;
use crate::branch::{debate_branch, risk_branch, DEBATE_TARGETS, RISK_TARGETS};
use crate::node::AgentNode;
use crate::state::WorkflowState;
use crate::tools::ToolRegistry;

/// Wire the trading pipeline:
///
/// ```text
/// analysts (selected, in fixed order) -> bull <-> bear -> research manager
///   -> trader -> risky -> safe -> neutral (rotating) -> risk judge -> end
/// ```
///
/// Both loops are entered through their branch functions, so a ceiling of
/// zero rounds skips straight to the manager or the judge.
pub fn build_trading_plan(
    config: &WorkflowConfig,
    model: Arc<dyn ModelClient>,
    tools: Arc<ToolRegistry>,
) -> Result<Plan<WorkflowState, Agent>> {
    let analysts: Vec<Agent> = AnalystKind::ALL
        .into_iter()
        .filter(|k| config.analysts.contains(k))
        .map(Agent::analyst)
        .collect();
    let (Some(first), Some(last_analyst)) = (analysts.first().copied(), analysts.last().copied())
    else {
        return Err(TradegraphError::Config(
            "at least one analyst must be selected".into(),
        ));
    };

    let mut graph: GraphBuilder<WorkflowState, Agent> = GraphBuilder::new();
    let downstream = [
        Agent::BullResearcher,
        Agent::BearResearcher,
        Agent::ResearchManager,
        Agent::Trader,
        Agent::RiskyAnalyst,
        Agent::SafeAnalyst,
        Agent::NeutralAnalyst,
        Agent::RiskJudge,
    ];
    for agent in analysts.iter().chain(downstream.iter()) {
        graph.add_node(
            *agent,
            Arc::new(AgentNode::new(
                *agent,
                model.clone(),
                tools.clone(),
                config.max_tool_steps,
            )),
        )?;
    }

    for pair in analysts.windows(2) {
        graph.add_edge(pair[0], pair[1]);
    }
    for from in [last_analyst, Agent::BullResearcher, Agent::BearResearcher] {
        graph.add_branch(from, Arc::new(debate_branch), DEBATE_TARGETS);
    }
    graph.add_edge(Agent::ResearchManager, Agent::Trader);
    for debater in [
        Agent::Trader,
        Agent::RiskyAnalyst,
        Agent::SafeAnalyst,
        Agent::NeutralAnalyst,
    ] {
        graph.add_branch(debater, Arc::new(risk_branch), RISK_TARGETS);
    }
    graph.add_edge(Agent::RiskJudge, Route::End);

    let plan = graph.compile(first)?;
    info!(
        start = %first,
        nodes = plan.len(),
        analysts = analysts.len(),
        "Trading pipeline compiled"
    );
    Ok(plan)
}
