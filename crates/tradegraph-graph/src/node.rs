use futures::future::BoxFuture;

use tradegraph_core::error::Result;

use crate::aggregator::Turn;
use crate::context::NodeContext;

/// A unit of work in the graph.
///
/// One visit prepares a request from the state, executes it against the
/// model/tool layer through an [`Aggregator`](crate::Aggregator), then routes:
/// mutates the state from the final turn and writes the routing field exactly
/// once with [`NodeContext::next_route`]. A visit that fails or is cancelled
/// leaves the routing field untouched.
pub trait Node<S, K>: Send + Sync + 'static {
    fn run<'a>(
        &'a self,
        ctx: &'a NodeContext<'a, S, K>,
        state: &'a mut S,
    ) -> BoxFuture<'a, Result<Turn>>;
}
