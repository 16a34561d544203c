//! Conditional routers for the two multi-party loops.
//!
//! Both are pure functions of the state and are evaluated on every visit.

use tradegraph_graph::Route;

use crate::agent::Agent;
use crate::state::{DebateSide, Stance, WorkflowState};

/// Successor after a bull or bear turn.
///
/// Parity of the turn count picks the side; the last speaker is never read.
pub fn debate_branch(state: &WorkflowState) -> Route<Agent> {
    let debate = state.debate();
    if debate.count >= debate.turn_ceiling() {
        return Route::To(Agent::ResearchManager);
    }
    let side = if debate.count % 2 == 0 {
        DebateSide::Bull
    } else {
        DebateSide::Bear
    };
    Route::To(Agent::debater(side))
}

/// Successor after a risky, safe, or neutral turn.
pub fn risk_branch(state: &WorkflowState) -> Route<Agent> {
    let risk = state.risk();
    if risk.count >= risk.turn_ceiling() {
        return Route::To(Agent::RiskJudge);
    }
    let next = risk
        .latest_speaker
        .map(|s| s.next())
        .unwrap_or(Stance::Risky);
    Route::To(Agent::risk_debater(next))
}

/// Targets `debate_branch` can return.
pub const DEBATE_TARGETS: [Agent; 3] = [
    Agent::BullResearcher,
    Agent::BearResearcher,
    Agent::ResearchManager,
];

/// Targets `risk_branch` can return.
pub const RISK_TARGETS: [Agent; 4] = [
    Agent::RiskyAnalyst,
    Agent::SafeAnalyst,
    Agent::NeutralAnalyst,
    Agent::RiskJudge,
];
