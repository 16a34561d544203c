use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Actionable trading signal distilled from the final decision text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            "HOLD" => Some(Self::Hold),
            _ => None,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        })
    }
}

/// Reduce a free-text decision to `Buy`, `Sell`, or `Hold`.
///
/// An explicit `FINAL TRANSACTION PROPOSAL` wins; otherwise the last bold or
/// bare decision word counts. Text with no decision word is `Hold`.
pub fn extract_signal(decision: &str) -> Signal {
    if let Some(signal) = proposal_pattern()
        .captures(decision)
        .and_then(|caps| caps.get(1))
        .and_then(|m| Signal::parse(m.as_str()))
    {
        return signal;
    }

    last_match(bold_pattern(), decision)
        .or_else(|| last_match(word_pattern(), decision))
        .unwrap_or(Signal::Hold)
}

fn proposal_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)final\s+transaction\s+proposal:?\s*\**\s*(buy|sell|hold)\b")
            .expect("proposal pattern is valid")
    })
}

fn bold_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\*\*\s*(buy|sell|hold)\s*\*\*").expect("bold pattern is valid")
    })
}

fn word_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(buy|sell|hold)\b").expect("word pattern is valid"))
}

fn last_match(re: &Regex, text: &str) -> Option<Signal> {
    re.captures_iter(text)
        .filter_map(|c| c.get(1).and_then(|m| Signal::parse(m.as_str())))
        .last()
}
