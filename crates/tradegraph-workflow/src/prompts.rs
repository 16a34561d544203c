//! Persona prompts and the state excerpts each agent sees.

use tradegraph_core::config::AnalystKind;
use tradegraph_core::types::ChatMessage;

use crate::agent::Agent;
use crate::state::{Stance, WorkflowState};

/// Build the outbound request for `agent` from the current state.
///
/// Pure: reads the state, never mutates it.
pub fn build_messages(agent: Agent, state: &WorkflowState) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt(agent, state)),
        ChatMessage::user(user_prompt(agent, state)),
    ]
}

fn system_prompt(agent: Agent, state: &WorkflowState) -> String {
    let persona = match agent {
        Agent::MarketAnalyst => {
            "You are a market analyst. Study price action and technical indicators \
             (moving averages, MACD, RSI, Bollinger bands, volume) and write a detailed \
             report on trend, momentum and volatility. End with a markdown table of key points."
        }
        Agent::SocialAnalyst => {
            "You are a social media and sentiment analyst. Assess what people are saying \
             about the company over the past week and how public sentiment is shifting. \
             End with a markdown table of key points."
        }
        Agent::NewsAnalyst => {
            "You are a news researcher. Review recent company news and macroeconomic \
             developments relevant to trading this instrument. \
             End with a markdown table of key points."
        }
        Agent::FundamentalsAnalyst => {
            "You are a fundamentals researcher. Analyze financial statements, company \
             profile, insider sentiment and insider transactions. \
             End with a markdown table of key points."
        }
        Agent::BullResearcher => {
            "You are a bull analyst advocating for investing in the stock. Build an \
             evidence-based case on growth potential, competitive advantages and positive \
             indicators, and rebut the bear's latest argument directly. Speak conversationally."
        }
        Agent::BearResearcher => {
            "You are a bear analyst arguing against investing in the stock. Stress risks, \
             competitive weaknesses and negative indicators, and rebut the bull's latest \
             argument directly. Speak conversationally."
        }
        Agent::ResearchManager => {
            "You are the portfolio manager and debate facilitator. Evaluate the debate, \
             commit to Buy, Sell, or Hold, and write a concrete investment plan for the trader. \
             Learn from past mistakes where relevant."
        }
        Agent::Trader => {
            "You are a trading agent. Turn the investment plan into a concrete trading \
             decision. Always conclude with 'FINAL TRANSACTION PROPOSAL: **BUY/HOLD/SELL**'."
        }
        Agent::RiskyAnalyst => {
            "You are the risky risk analyst. Champion high-reward opportunities and \
             challenge the conservative and neutral views point by point."
        }
        Agent::SafeAnalyst => {
            "You are the safe/conservative risk analyst. Protect assets, minimize \
             volatility, and challenge the risky and neutral views point by point."
        }
        Agent::NeutralAnalyst => {
            "You are the neutral risk analyst. Weigh benefits against risks and challenge \
             both the risky and safe views where they are too extreme."
        }
        Agent::RiskJudge => {
            "You are the risk management judge. Evaluate the risk debate and give a clear \
             recommendation: Buy, Sell, or Hold. Refine the trader's plan and explain \
             the decision, learning from past mistakes."
        }
    };

    format!(
        "{}\nInstrument: {}. Current date: {}.",
        persona,
        state.subject_id(),
        state.as_of()
    )
}

fn user_prompt(agent: Agent, state: &WorkflowState) -> String {
    if let Some(kind) = agent.analyst_kind() {
        return analyst_request(kind, state);
    }

    let reports = reports_section(state);
    match agent {
        Agent::BullResearcher | Agent::BearResearcher => {
            let d = state.debate();
            format!(
                "{reports}\n\nDebate so far:\n{}\n\nLast argument from the other side:\n{}",
                or_none(&d.history),
                or_none(&d.current_response)
            )
        }
        Agent::ResearchManager => format!(
            "{reports}\n\nPast reflections:\n{}\n\nDebate history:\n{}",
            prior_section(state),
            or_none(&state.debate().history)
        ),
        Agent::Trader => format!(
            "{reports}\n\nProposed investment plan for {}:\n{}",
            state.subject_id(),
            state.investment_plan().unwrap_or("(none)")
        ),
        Agent::RiskyAnalyst | Agent::SafeAnalyst | Agent::NeutralAnalyst => {
            let r = state.risk();
            let others: Vec<String> = [Stance::Risky, Stance::Safe, Stance::Neutral]
                .into_iter()
                .filter(|s| Some(*s) != stance_of(agent))
                .map(|s| format!("Last {} argument: {}", s.label(), or_none(r.current(s))))
                .collect();
            format!(
                "{reports}\n\nTrader's decision:\n{}\n\nRisk discussion so far:\n{}\n\n{}",
                state.trader_plan().unwrap_or("(none)"),
                or_none(&r.history),
                others.join("\n")
            )
        }
        Agent::RiskJudge => format!(
            "Trader's plan:\n{}\n\nPast reflections:\n{}\n\nRisk debate history:\n{}",
            state.trader_plan().unwrap_or("(none)"),
            prior_section(state),
            or_none(&state.risk().history)
        ),
        _ => state.prompt().to_string(),
    }
}

fn analyst_request(kind: AnalystKind, state: &WorkflowState) -> String {
    let focus = match kind {
        AnalystKind::Market => "price history and technical indicators",
        AnalystKind::Social => "social media posts and sentiment",
        AnalystKind::News => "recent news and macro events",
        AnalystKind::Fundamentals => "financial statements and insider activity",
    };
    format!(
        "{}\n\nResearch {} for {} as of {} using the available tools, then write your report.",
        state.prompt(),
        focus,
        state.subject_id(),
        state.as_of()
    )
}

fn reports_section(state: &WorkflowState) -> String {
    let mut out = String::new();
    for (kind, title) in [
        (AnalystKind::Market, "Market research report"),
        (AnalystKind::Social, "Social media sentiment report"),
        (AnalystKind::News, "Latest world affairs news"),
        (AnalystKind::Fundamentals, "Company fundamentals report"),
    ] {
        if let Some(report) = state.report(kind) {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&format!("{title}:\n{report}"));
        }
    }
    out
}

fn prior_section(state: &WorkflowState) -> String {
    if state.prior_decisions().is_empty() {
        return "No past memories found.".to_string();
    }
    state.prior_decisions().join("\n\n")
}

fn stance_of(agent: Agent) -> Option<Stance> {
    match agent {
        Agent::RiskyAnalyst => Some(Stance::Risky),
        Agent::SafeAnalyst => Some(Stance::Safe),
        Agent::NeutralAnalyst => Some(Stance::Neutral),
        _ => None,
    }
}

fn or_none(s: &str) -> &str {
    if s.is_empty() {
        "(none)"
    } else {
        s
    }
}
