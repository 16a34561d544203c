//! Workflow graph runtime.
//!
//! Nodes are registered on a [`GraphBuilder`], wired with plain edges or
//! branch functions, and compiled into an immutable [`Plan`]. The
//! [`Executor`] drives one mutable state through a plan until the terminal
//! route, either blocking or streaming lifecycle events.

pub mod aggregator;
pub mod builder;
pub mod context;
pub mod executor;
pub mod node;
pub mod plan;
pub mod route;

pub use aggregator::{Aggregator, Turn};
pub use builder::{BranchFn, GraphBuilder};
pub use context::{Emitter, NodeContext};
pub use executor::{Executor, RunSummary};
pub use node::Node;
pub use plan::{Plan, Transition};
pub use route::{NodeKey, Route, RoutedState};
