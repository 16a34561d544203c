use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use tradegraph_core::config::OrphanFragmentPolicy;
use tradegraph_core::error::{Result, TradegraphError};
use tradegraph_core::types::WorkflowEvent;

use crate::context::{Emitter, NodeContext};
use crate::plan::Plan;
use crate::route::{NodeKey, Route, RoutedState};

/// Outcome of a run that reached the terminal route.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary<K> {
    /// Node visits performed.
    pub iterations: usize,
    /// Visited nodes in execution order.
    pub visited: Vec<K>,
    pub elapsed_ms: u64,
}

/// Drives a state through a compiled plan.
///
/// One executor can serve many runs; everything per-run (the state and the
/// cancellation token) is passed to [`run`](Self::run) or
/// [`stream`](Self::stream).
#[derive(Clone)]
pub struct Executor {
    max_iterations: usize,
    orphan_policy: OrphanFragmentPolicy,
}

impl Executor {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            orphan_policy: OrphanFragmentPolicy::default(),
        }
    }

    pub fn with_orphan_policy(mut self, policy: OrphanFragmentPolicy) -> Self {
        self.orphan_policy = policy;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Run to completion without emitting events.
    pub async fn run<S, K>(
        &self,
        plan: &Plan<S, K>,
        state: &mut S,
        cancel: &CancellationToken,
    ) -> Result<RunSummary<K>>
    where
        S: RoutedState<K> + 'static,
        K: NodeKey,
    {
        let mut current = None;
        self.drive(plan, state, &Emitter::disabled(), cancel, &mut current)
            .await
    }

    /// Run to completion, sending lifecycle events to `sink`.
    ///
    /// Emits `RunStarted` first, then node events, then exactly one of
    /// `Finished` or `RunError`.
    pub async fn stream<S, K>(
        &self,
        plan: &Plan<S, K>,
        state: &mut S,
        sink: mpsc::UnboundedSender<WorkflowEvent>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary<K>>
    where
        S: RoutedState<K> + 'static,
        K: NodeKey,
    {
        let emitter = Emitter::new(sink);
        emitter.emit(WorkflowEvent::RunStarted {
            start: plan.start().to_string(),
        });

        let mut current = None;
        match self.drive(plan, state, &emitter, cancel, &mut current).await {
            Ok(summary) => {
                emitter.emit(WorkflowEvent::Finished {
                    iterations: summary.iterations,
                });
                Ok(summary)
            }
            Err(e) => {
                emitter.emit(WorkflowEvent::RunError {
                    node: current.map(|k: K| k.to_string()),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn drive<S, K>(
        &self,
        plan: &Plan<S, K>,
        state: &mut S,
        emitter: &Emitter,
        cancel: &CancellationToken,
        current: &mut Option<K>,
    ) -> Result<RunSummary<K>>
    where
        S: RoutedState<K> + 'static,
        K: NodeKey,
    {
        let start = Instant::now();
        let mut visited: Vec<K> = Vec::new();

        state.set_route(Route::To(plan.start().clone()));
        info!(start = %plan.start(), max_iterations = self.max_iterations, "Starting run");

        loop {
            let key = match state.current_route() {
                Some(Route::To(k)) => k.clone(),
                Some(Route::End) => break,
                None => {
                    return Err(TradegraphError::GraphValidation(
                        "routing field is empty".into(),
                    ))
                }
            };
            *current = Some(key.clone());

            if visited.len() >= self.max_iterations {
                error!(node = %key, iterations = visited.len(), "Iteration limit exceeded");
                return Err(TradegraphError::IterationLimitExceeded {
                    node: key.to_string(),
                    iterations: visited.len(),
                });
            }

            if cancel.is_cancelled() {
                return Err(TradegraphError::Cancelled);
            }

            let node = plan.node(&key).ok_or_else(|| {
                TradegraphError::GraphValidation(format!(
                    "routed to unregistered node '{}'",
                    key
                ))
            })?;

            let ctx = NodeContext::new(
                &key,
                plan.transition(&key),
                emitter,
                cancel,
                self.orphan_policy,
            );

            debug!(node = %key, iteration = visited.len() + 1, "Executing node");
            let node_start = Instant::now();
            let writes_before = state.route_writes();

            let turn = node.run(&ctx, state).await?;

            let writes = state.route_writes() - writes_before;
            if writes != 1 {
                return Err(TradegraphError::RouteNotWritten {
                    node: key.to_string(),
                    writes,
                });
            }

            debug!(
                node = %key,
                next = ?state.current_route().map(|r| r.to_string()),
                content_len = turn.content.len(),
                tool_calls = turn.tool_calls.len(),
                elapsed_ms = node_start.elapsed().as_millis() as u64,
                "Node complete"
            );
            visited.push(key);
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(iterations = visited.len(), elapsed_ms, "Run finished");
        *current = None;

        Ok(RunSummary {
            iterations: visited.len(),
            visited,
            elapsed_ms,
        })
    }
}
