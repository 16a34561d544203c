use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tradegraph_core::config::AnalystKind;
use tradegraph_core::types::ChatMessage;
use tradegraph_graph::{Route, RoutedState};

use crate::agent::Agent;

/// Pipeline phases with a completion flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Market,
    Social,
    News,
    Fundamentals,
    InvestmentDebate,
    Trading,
    RiskDebate,
}

impl From<AnalystKind> for Phase {
    fn from(kind: AnalystKind) -> Self {
        match kind {
            AnalystKind::Market => Self::Market,
            AnalystKind::Social => Self::Social,
            AnalystKind::News => Self::News,
            AnalystKind::Fundamentals => Self::Fundamentals,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateSide {
    Bull,
    Bear,
}

impl DebateSide {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Bull => "Bull Analyst",
            Self::Bear => "Bear Analyst",
        }
    }
}

/// Risk discussion stances, rotated risky -> safe -> neutral -> risky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Risky,
    Safe,
    Neutral,
}

impl Stance {
    pub fn next(&self) -> Self {
        match self {
            Self::Risky => Self::Safe,
            Self::Safe => Self::Neutral,
            Self::Neutral => Self::Risky,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Risky => "Risky Analyst",
            Self::Safe => "Safe Analyst",
            Self::Neutral => "Neutral Analyst",
        }
    }
}

/// Bull/bear investment debate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebateState {
    pub history: String,
    pub bull_history: String,
    pub bear_history: String,
    pub current_response: String,
    pub last_side: Option<DebateSide>,
    pub count: usize,
    pub max_rounds: usize,
}

impl DebateState {
    pub fn new(max_rounds: usize) -> Self {
        Self {
            max_rounds,
            ..Default::default()
        }
    }

    /// Total turns before the manager takes over.
    pub fn turn_ceiling(&self) -> usize {
        2 * self.max_rounds
    }
}

/// Three-way risk discussion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskState {
    pub history: String,
    pub risky_history: String,
    pub safe_history: String,
    pub neutral_history: String,
    pub current_risky: String,
    pub current_safe: String,
    pub current_neutral: String,
    pub latest_speaker: Option<Stance>,
    pub count: usize,
    pub max_rounds: usize,
}

impl RiskState {
    pub fn new(max_rounds: usize) -> Self {
        Self {
            max_rounds,
            ..Default::default()
        }
    }

    /// One turn per stance per round.
    pub fn turn_ceiling(&self) -> usize {
        3 * self.max_rounds
    }

    pub fn current(&self, stance: Stance) -> &str {
        match stance {
            Stance::Risky => &self.current_risky,
            Stance::Safe => &self.current_safe,
            Stance::Neutral => &self.current_neutral,
        }
    }
}

/// The single mutable record threaded through every node of one run.
///
/// All mutation goes through the setters below. Phase reports and the final
/// decision are write-once: a conflicting second write keeps the first value
/// and logs a warning.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    subject_id: String,
    as_of: String,
    prompt: String,
    history: Vec<ChatMessage>,

    market_report: Option<String>,
    sentiment_report: Option<String>,
    news_report: Option<String>,
    fundamentals_report: Option<String>,

    debate: DebateState,
    risk: RiskState,

    investment_plan: Option<String>,
    trader_plan: Option<String>,
    final_decision: Option<String>,
    prior_decisions: Vec<String>,

    completed: HashSet<Phase>,
    complete: bool,

    route: Option<Route<Agent>>,
    route_writes: u64,
}

impl WorkflowState {
    pub fn new(
        subject_id: impl Into<String>,
        as_of: impl Into<String>,
        prompt: impl Into<String>,
        max_debate_rounds: usize,
        max_risk_rounds: usize,
    ) -> Self {
        let prompt = prompt.into();
        Self {
            subject_id: subject_id.into(),
            as_of: as_of.into(),
            history: vec![ChatMessage::user(prompt.clone())],
            prompt,
            market_report: None,
            sentiment_report: None,
            news_report: None,
            fundamentals_report: None,
            debate: DebateState::new(max_debate_rounds),
            risk: RiskState::new(max_risk_rounds),
            investment_plan: None,
            trader_plan: None,
            final_decision: None,
            prior_decisions: Vec::new(),
            completed: HashSet::new(),
            complete: false,
            route: None,
            route_writes: 0,
        }
    }

    /// Attach read-only reflections from earlier runs.
    pub fn with_prior_decisions(mut self, prior: Vec<String>) -> Self {
        self.prior_decisions = prior;
        self
    }

    // ── Readers ─────────────────────────────────────────────

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn as_of(&self) -> &str {
        &self.as_of
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn report(&self, kind: AnalystKind) -> Option<&str> {
        match kind {
            AnalystKind::Market => self.market_report.as_deref(),
            AnalystKind::Social => self.sentiment_report.as_deref(),
            AnalystKind::News => self.news_report.as_deref(),
            AnalystKind::Fundamentals => self.fundamentals_report.as_deref(),
        }
    }

    pub fn debate(&self) -> &DebateState {
        &self.debate
    }

    pub fn risk(&self) -> &RiskState {
        &self.risk
    }

    pub fn investment_plan(&self) -> Option<&str> {
        self.investment_plan.as_deref()
    }

    pub fn trader_plan(&self) -> Option<&str> {
        self.trader_plan.as_deref()
    }

    pub fn final_decision(&self) -> Option<&str> {
        self.final_decision.as_deref()
    }

    pub fn prior_decisions(&self) -> &[String] {
        &self.prior_decisions
    }

    pub fn is_phase_complete(&self, phase: Phase) -> bool {
        self.completed.contains(&phase)
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    // ── Setters ─────────────────────────────────────────────

    pub fn append_message(&mut self, msg: ChatMessage) {
        self.history.push(msg);
    }

    pub fn set_report(&mut self, kind: AnalystKind, text: impl Into<String>) {
        let slot = match kind {
            AnalystKind::Market => &mut self.market_report,
            AnalystKind::Social => &mut self.sentiment_report,
            AnalystKind::News => &mut self.news_report,
            AnalystKind::Fundamentals => &mut self.fundamentals_report,
        };
        write_once(slot, text.into(), "report");
    }

    pub fn set_investment_plan(&mut self, text: impl Into<String>) {
        write_once(&mut self.investment_plan, text.into(), "investment_plan");
    }

    pub fn set_trader_plan(&mut self, text: impl Into<String>) {
        write_once(&mut self.trader_plan, text.into(), "trader_plan");
    }

    pub fn set_final_decision(&mut self, text: impl Into<String>) {
        write_once(&mut self.final_decision, text.into(), "final_decision");
    }

    pub fn record_debate_turn(&mut self, side: DebateSide, text: &str) {
        let d = &mut self.debate;
        if d.last_side == Some(side) && d.current_response == text {
            debug!(?side, "Ignoring repeated debate turn");
            return;
        }

        let argument = format!("{}: {}", side.label(), text);
        append_line(&mut d.history, &argument);
        match side {
            DebateSide::Bull => append_line(&mut d.bull_history, &argument),
            DebateSide::Bear => append_line(&mut d.bear_history, &argument),
        }
        d.current_response = text.to_string();
        d.last_side = Some(side);
        d.count += 1;
    }

    pub fn record_risk_turn(&mut self, stance: Stance, text: &str) {
        let r = &mut self.risk;
        if r.latest_speaker == Some(stance) && r.current(stance) == text {
            debug!(?stance, "Ignoring repeated risk turn");
            return;
        }

        let argument = format!("{}: {}", stance.label(), text);
        append_line(&mut r.history, &argument);
        let (transcript, current) = match stance {
            Stance::Risky => (&mut r.risky_history, &mut r.current_risky),
            Stance::Safe => (&mut r.safe_history, &mut r.current_safe),
            Stance::Neutral => (&mut r.neutral_history, &mut r.current_neutral),
        };
        append_line(transcript, &argument);
        *current = text.to_string();
        r.latest_speaker = Some(stance);
        r.count += 1;
    }

    pub fn mark_phase_complete(&mut self, phase: Phase) {
        self.completed.insert(phase);
    }

    /// Flag the whole run as complete. Never reset.
    pub fn mark_complete(&mut self) {
        self.complete = true;
    }
}

impl RoutedState<Agent> for WorkflowState {
    fn current_route(&self) -> Option<&Route<Agent>> {
        self.route.as_ref()
    }

    fn set_route(&mut self, route: Route<Agent>) {
        self.route_writes += 1;
        self.route = Some(route);
    }

    fn route_writes(&self) -> u64 {
        self.route_writes
    }
}

fn write_once(slot: &mut Option<String>, value: String, field: &str) {
    match slot.as_deref() {
        None => *slot = Some(value),
        Some(existing) if existing == value => {}
        Some(_) => warn!(field, "Ignoring conflicting write to write-once field"),
    }
}

fn append_line(buf: &mut String, line: &str) {
    if !buf.is_empty() {
        buf.push('\n');
    }
    buf.push_str(line);
}
