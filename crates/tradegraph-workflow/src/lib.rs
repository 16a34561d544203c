//! Multi-agent trading analysis built on the tradegraph runtime.
//!
//! Analysts research the instrument, bull and bear researchers debate, the
//! research manager and trader turn the debate into a plan, and a three-way
//! risk discussion feeds the judge's final decision.

pub mod agent;
pub mod branch;
pub mod node;
pub mod pipeline;
pub mod prompts;
pub mod session;
pub mod signal;
pub mod state;
pub mod tools;

pub use agent::Agent;
pub use branch::{debate_branch, risk_branch};
pub use node::AgentNode;
pub use pipeline::build_trading_plan;
pub use session::{RunReport, TradingSession};
pub use signal::{extract_signal, Signal};
pub use state::{DebateSide, Phase, Stance, WorkflowState};
pub use tools::ToolRegistry;
