use std::fmt;

use serde::{Deserialize, Serialize};

use tradegraph_core::config::AnalystKind;

use crate::state::{DebateSide, Stance};

/// Every node in the trading pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Agent {
    MarketAnalyst,
    SocialAnalyst,
    NewsAnalyst,
    FundamentalsAnalyst,
    BullResearcher,
    BearResearcher,
    ResearchManager,
    Trader,
    RiskyAnalyst,
    SafeAnalyst,
    NeutralAnalyst,
    RiskJudge,
}

impl Agent {
    pub const ALL: [Agent; 12] = [
        Self::MarketAnalyst,
        Self::SocialAnalyst,
        Self::NewsAnalyst,
        Self::FundamentalsAnalyst,
        Self::BullResearcher,
        Self::BearResearcher,
        Self::ResearchManager,
        Self::Trader,
        Self::RiskyAnalyst,
        Self::SafeAnalyst,
        Self::NeutralAnalyst,
        Self::RiskJudge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarketAnalyst => "market_analyst",
            Self::SocialAnalyst => "social_analyst",
            Self::NewsAnalyst => "news_analyst",
            Self::FundamentalsAnalyst => "fundamentals_analyst",
            Self::BullResearcher => "bull_researcher",
            Self::BearResearcher => "bear_researcher",
            Self::ResearchManager => "research_manager",
            Self::Trader => "trader",
            Self::RiskyAnalyst => "risky_analyst",
            Self::SafeAnalyst => "safe_analyst",
            Self::NeutralAnalyst => "neutral_analyst",
            Self::RiskJudge => "risk_judge",
        }
    }

    pub fn analyst(kind: AnalystKind) -> Self {
        match kind {
            AnalystKind::Market => Self::MarketAnalyst,
            AnalystKind::Social => Self::SocialAnalyst,
            AnalystKind::News => Self::NewsAnalyst,
            AnalystKind::Fundamentals => Self::FundamentalsAnalyst,
        }
    }

    /// The analyst phase this agent reports on, if it is an analyst.
    pub fn analyst_kind(&self) -> Option<AnalystKind> {
        match self {
            Self::MarketAnalyst => Some(AnalystKind::Market),
            Self::SocialAnalyst => Some(AnalystKind::Social),
            Self::NewsAnalyst => Some(AnalystKind::News),
            Self::FundamentalsAnalyst => Some(AnalystKind::Fundamentals),
            _ => None,
        }
    }

    pub fn debater(side: DebateSide) -> Self {
        match side {
            DebateSide::Bull => Self::BullResearcher,
            DebateSide::Bear => Self::BearResearcher,
        }
    }

    pub fn risk_debater(stance: Stance) -> Self {
        match stance {
            Stance::Risky => Self::RiskyAnalyst,
            Stance::Safe => Self::SafeAnalyst,
            Stance::Neutral => Self::NeutralAnalyst,
        }
    }

    /// Analysts are the only agents that call retrieval tools.
    pub fn uses_tools(&self) -> bool {
        self.analyst_kind().is_some()
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
