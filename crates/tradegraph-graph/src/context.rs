use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tradegraph_core::config::OrphanFragmentPolicy;
use tradegraph_core::types::WorkflowEvent;

use crate::aggregator::Aggregator;
use crate::plan::Transition;
use crate::route::{NodeKey, Route};

/// One-way sink for lifecycle events.
///
/// Disabled in blocking mode. Sending never blocks; events are dropped once
/// the receiving side has gone away.
#[derive(Clone, Default)]
pub struct Emitter {
    tx: Option<mpsc::UnboundedSender<WorkflowEvent>>,
}

impl Emitter {
    pub fn new(tx: mpsc::UnboundedSender<WorkflowEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is listening any more
            let _ = tx.send(event);
        }
    }
}

/// Per-visit view of the plan handed to a node.
pub struct NodeContext<'a, S, K> {
    pub(crate) key: &'a K,
    pub(crate) transition: Option<&'a Transition<S, K>>,
    pub(crate) emitter: &'a Emitter,
    pub(crate) cancel: &'a CancellationToken,
    pub(crate) orphan_policy: OrphanFragmentPolicy,
}

impl<'a, S, K: NodeKey> NodeContext<'a, S, K> {
    pub fn new(
        key: &'a K,
        transition: Option<&'a Transition<S, K>>,
        emitter: &'a Emitter,
        cancel: &'a CancellationToken,
        orphan_policy: OrphanFragmentPolicy,
    ) -> Self {
        Self {
            key,
            transition,
            emitter,
            cancel,
            orphan_policy,
        }
    }

    pub fn key(&self) -> &K {
        self.key
    }

    /// Successor for the current state: the plain edge, a fresh evaluation of
    /// the branch function, or `Route::End` when nothing was declared.
    pub fn next_route(&self, state: &S) -> Route<K> {
        match self.transition {
            Some(t) => t.resolve(state),
            None => Route::End,
        }
    }

    pub fn emitter(&self) -> &Emitter {
        self.emitter
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fresh accumulator for one execute step of this node.
    pub fn aggregator(&self) -> Aggregator<'a> {
        Aggregator::new(self.key.to_string(), self.emitter, self.orphan_policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_emitter_drops_events() {
        let emitter = Emitter::disabled();
        assert!(!emitter.is_enabled());
        emitter.emit(WorkflowEvent::Finished { iterations: 1 });
    }

    #[test]
    fn test_emitter_survives_dropped_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Emitter::new(tx);
        drop(rx);
        emitter.emit(WorkflowEvent::Finished { iterations: 1 });
    }

    #[test]
    fn test_next_route_without_transition_is_end() {
        let emitter = Emitter::disabled();
        let cancel = CancellationToken::new();
        let key = "judge";
        let ctx: NodeContext<'_, (), &str> = NodeContext::new(
            &key,
            None,
            &emitter,
            &cancel,
            OrphanFragmentPolicy::default(),
        );
        assert_eq!(ctx.next_route(&()), Route::End);
    }
}
