use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use tradegraph_core::error::{Result, TradegraphError};

use crate::node::Node;
use crate::plan::{Plan, Transition};
use crate::route::{NodeKey, Route};

/// Branch decision function: a pure function of the state.
pub type BranchFn<S, K> = Arc<dyn Fn(&S) -> Route<K> + Send + Sync>;

/// Collects nodes and transitions, then validates them into a [`Plan`].
///
/// Edges and branches may reference nodes that are registered later;
/// dangling references are reported by [`compile`](Self::compile).
pub struct GraphBuilder<S, K: NodeKey> {
    nodes: HashMap<K, Arc<dyn Node<S, K>>>,
    transitions: Vec<(K, Transition<S, K>)>,
}

impl<S, K: NodeKey> Default for GraphBuilder<S, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, K: NodeKey> GraphBuilder<S, K> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            transitions: Vec::new(),
        }
    }

    /// Register a node under `key`.
    pub fn add_node(&mut self, key: K, node: Arc<dyn Node<S, K>>) -> Result<&mut Self> {
        if self.nodes.contains_key(&key) {
            return Err(TradegraphError::DuplicateNode(key.to_string()));
        }
        self.nodes.insert(key, node);
        Ok(self)
    }

    /// Declare an unconditional successor. `to` may be `Route::End`.
    pub fn add_edge(&mut self, from: K, to: impl Into<Route<K>>) -> &mut Self {
        self.transitions.push((from, Transition::Edge(to.into())));
        self
    }

    /// Declare a conditional successor. `allowed` lists every route the
    /// function may return and is only used for validation.
    pub fn add_branch<R>(
        &mut self,
        from: K,
        decide: BranchFn<S, K>,
        allowed: impl IntoIterator<Item = R>,
    ) -> &mut Self
    where
        R: Into<Route<K>>,
    {
        let allowed = allowed.into_iter().map(Into::into).collect();
        self.transitions
            .push((from, Transition::Branch { decide, allowed }));
        self
    }

    /// Validate the graph and freeze it.
    pub fn compile(self, start: K) -> Result<Plan<S, K>> {
        if !self.nodes.contains_key(&start) {
            return Err(TradegraphError::GraphValidation(format!(
                "start node '{}' is not registered",
                start
            )));
        }

        let mut transitions: HashMap<K, Transition<S, K>> = HashMap::new();
        for (from, transition) in self.transitions {
            if !self.nodes.contains_key(&from) {
                return Err(TradegraphError::GraphValidation(format!(
                    "transition declared from unregistered node '{}'",
                    from
                )));
            }
            for target in transition.targets() {
                if let Route::To(k) = target {
                    if !self.nodes.contains_key(k) {
                        return Err(TradegraphError::GraphValidation(format!(
                            "node '{}' routes to unregistered node '{}'",
                            from, k
                        )));
                    }
                }
            }
            if transitions.contains_key(&from) {
                return Err(TradegraphError::GraphValidation(format!(
                    "node '{}' declares more than one transition",
                    from
                )));
            }
            transitions.insert(from, transition);
        }

        debug!(
            start = %start,
            nodes = self.nodes.len(),
            transitions = transitions.len(),
            "Compiled graph"
        );

        Ok(Plan {
            nodes: self.nodes,
            transitions,
            start,
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;

    use super::*;
    use crate::aggregator::Turn;
    use crate::context::NodeContext;

    struct Noop;

    impl Node<(), &'static str> for Noop {
        fn run<'a>(
            &'a self,
            _ctx: &'a NodeContext<'a, (), &'static str>,
            _state: &'a mut (),
        ) -> BoxFuture<'a, Result<Turn>> {
            Box::pin(async { Ok(Turn::default()) })
        }
    }

    fn builder_with(keys: &[&'static str]) -> GraphBuilder<(), &'static str> {
        let mut b = GraphBuilder::new();
        for k in keys {
            b.add_node(*k, Arc::new(Noop)).unwrap();
        }
        b
    }

    #[test]
    fn test_duplicate_node() {
        let mut b = builder_with(&["trader"]);
        let err = b.add_node("trader", Arc::new(Noop)).err().unwrap();
        assert!(matches!(err, TradegraphError::DuplicateNode(k) if k == "trader"));
    }

    #[test]
    fn test_compile_linear() {
        let mut b = builder_with(&["a", "b"]);
        b.add_edge("a", "b").add_edge("b", Route::End);
        let plan = b.compile("a").unwrap();
        assert_eq!(plan.start(), &"a");
        assert_eq!(plan.len(), 2);
        assert!(plan.transition(&"a").is_some());
    }

    #[test]
    fn test_unknown_start() {
        let b = builder_with(&["a"]);
        assert!(matches!(
            b.compile("missing"),
            Err(TradegraphError::GraphValidation(_))
        ));
    }

    #[test]
    fn test_edge_to_unregistered_node() {
        let mut b = builder_with(&["a"]);
        b.add_edge("a", "ghost");
        let err = b.compile("a").err().unwrap();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_edge_from_unregistered_node() {
        let mut b = builder_with(&["a"]);
        b.add_edge("ghost", "a");
        assert!(matches!(
            b.compile("a"),
            Err(TradegraphError::GraphValidation(_))
        ));
    }

    #[test]
    fn test_branch_to_unregistered_node_fails_before_run() {
        let mut b = builder_with(&["bull", "bear"]);
        b.add_branch(
            "bull",
            Arc::new(|_: &()| Route::To("research_manager")),
            ["bear", "research_manager"],
        );
        let err = b.compile("bull").err().unwrap();
        assert!(matches!(&err, TradegraphError::GraphValidation(m) if m.contains("research_manager")));
    }

    #[test]
    fn test_two_transitions_for_one_node() {
        let mut b = builder_with(&["a", "b"]);
        b.add_edge("a", "b");
        b.add_branch("a", Arc::new(|_: &()| Route::End), [Route::End]);
        assert!(matches!(
            b.compile("a"),
            Err(TradegraphError::GraphValidation(m)) if m.contains("more than one")
        ));
    }
}
