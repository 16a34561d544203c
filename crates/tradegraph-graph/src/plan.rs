use std::collections::HashMap;
use std::sync::Arc;

use crate::builder::BranchFn;
use crate::node::Node;
use crate::route::{NodeKey, Route};

/// Outgoing transition declared for a node.
pub enum Transition<S, K> {
    /// Unconditional successor.
    Edge(Route<K>),
    /// Successor computed from the state on every visit.
    Branch {
        decide: BranchFn<S, K>,
        allowed: Vec<Route<K>>,
    },
}

impl<S, K: Clone> Transition<S, K> {
    /// Resolve the successor for the given state.
    pub fn resolve(&self, state: &S) -> Route<K> {
        match self {
            Self::Edge(route) => route.clone(),
            Self::Branch { decide, .. } => decide(state),
        }
    }

    /// Every route this transition can take, as declared.
    pub fn targets(&self) -> &[Route<K>] {
        match self {
            Self::Edge(route) => std::slice::from_ref(route),
            Self::Branch { allowed, .. } => allowed,
        }
    }
}

/// Immutable, validated execution plan.
///
/// A plan holds no per-run data and can be shared across concurrent runs
/// behind an `Arc`.
pub struct Plan<S, K: NodeKey> {
    pub(crate) nodes: HashMap<K, Arc<dyn Node<S, K>>>,
    pub(crate) transitions: HashMap<K, Transition<S, K>>,
    pub(crate) start: K,
}

impl<S, K: NodeKey> Plan<S, K> {
    pub fn start(&self) -> &K {
        &self.start
    }

    pub fn node(&self, key: &K) -> Option<&Arc<dyn Node<S, K>>> {
        self.nodes.get(key)
    }

    /// Declared transition, or `None` when the node routes to the end.
    pub fn transition(&self, key: &K) -> Option<&Transition<S, K>> {
        self.transitions.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
