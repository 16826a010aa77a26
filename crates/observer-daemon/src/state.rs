//! Shared observer state.
//!
//! One [`ChainObserver`] is shared between the opinion loop, the component
//! that ingests committed nodes into the graph, and whatever reports chain
//! progress (head sync, latest block). Everything mutable sits behind a
//! single `tokio::sync::RwLock`; callers hold a guard only for as long as
//! they traverse or mutate and never across machine execution.

use std::sync::Arc;

use observer_core::classifier::Verdict;
use observer_core::clock::Clock;
use observer_core::config::ObserverConfig;
use observer_core::error::ObserverError;
use observer_core::graph::{AssertionGraph, GraphNode};
use observer_core::hash::{short_hex, Hash};
use observer_core::inbox::Inbox;
use observer_core::machine::Machine;
use observer_core::preparer::{
    PreparationInput, PreparedAssertion, TimeBoundsPolicy, WindowPolicy,
};
use observer_core::protocol::BlockId;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::listener::ChainListener;

/// Observer shared between tasks.
pub type SharedObserver<G> = Arc<ChainObserver<G>>;

/// Handle to the observer state with interior mutability.
pub struct ChainObserver<G> {
    /// The inner mutable state.
    inner: RwLock<ObserverState<G>>,
    /// Chooses time bounds for prepared assertions.
    policy: Arc<dyn TimeBoundsPolicy>,
    /// Loop and preparation tuning.
    config: ObserverConfig,
}

impl<G: AssertionGraph> ChainObserver<G> {
    /// Creates an observer whose verified frontier starts at `frontier`.
    ///
    /// Time bounds for prepared assertions come from a [`WindowPolicy`]
    /// built from `config` until replaced with
    /// [`Self::with_time_bounds_policy`].
    ///
    /// # Errors
    ///
    /// Returns [`ObserverError::InvalidConfig`] if `config` fails
    /// [`ObserverConfig::validate`], or [`ObserverError::NodeNotFound`] if
    /// `frontier` is not in `graph`.
    pub fn new(
        graph: G,
        inbox: Arc<dyn Inbox>,
        frontier: Hash,
        config: ObserverConfig,
    ) -> Result<Self, ObserverError> {
        config.validate().map_err(ObserverError::invalid_config)?;
        if graph.node(&frontier).is_none() {
            return Err(ObserverError::node_not_found(frontier));
        }
        let policy = Arc::new(WindowPolicy::from_config(&config));
        Ok(Self {
            inner: RwLock::new(ObserverState {
                graph,
                inbox,
                calculated_valid: frontier,
                known_valid: frontier,
                pending_state: None,
                at_head: false,
                latest_block: BlockId::default(),
                listeners: Vec::new(),
            }),
            policy,
            config,
        })
    }

    /// Replaces the time bounds policy.
    #[must_use]
    pub fn with_time_bounds_policy(mut self, policy: Arc<dyn TimeBoundsPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Observer configuration.
    #[must_use]
    pub const fn config(&self) -> &ObserverConfig {
        &self.config
    }

    /// Get read access to the inner state.
    pub async fn read(&self) -> RwLockReadGuard<'_, ObserverState<G>> {
        self.inner.read().await
    }

    /// Get write access to the inner state.
    pub async fn write(&self) -> RwLockWriteGuard<'_, ObserverState<G>> {
        self.inner.write().await
    }

    /// Registers a listener for frontier advances and prepared assertions.
    pub async fn add_listener(&self, listener: Arc<dyn ChainListener>) {
        self.write().await.listeners.push(listener);
    }

    /// Records whether the validator has caught up with the chain head.
    ///
    /// Speculative preparation only runs while this is set.
    pub async fn set_at_head(&self, at_head: bool) {
        let mut state = self.write().await;
        if state.at_head != at_head {
            info!(at_head, "Chain head sync changed");
        }
        state.at_head = at_head;
    }

    /// Records the latest observed L1 block.
    pub async fn set_latest_block(&self, block: BlockId) {
        self.write().await.latest_block = block;
    }

    /// Runs `f` with exclusive access to the graph.
    ///
    /// This is how newly committed nodes reach the graph. Nodes must never be
    /// removed while the observer references them.
    pub async fn update_graph<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut G) -> R,
    {
        f(&mut self.write().await.graph)
    }

    /// Point-in-time summary of the observer.
    ///
    /// # Errors
    ///
    /// Returns [`ObserverError::NodeNotFound`] if the frontier or the
    /// deepest known valid node has gone missing from the graph.
    pub async fn status(&self) -> Result<ObserverStatus, ObserverError> {
        let state = self.read().await;
        let frontier = state.frontier()?;
        let known_valid = state.known_valid()?;
        Ok(ObserverStatus {
            frontier: frontier.hash(),
            frontier_depth: frontier.depth(),
            known_valid: known_valid.hash(),
            known_valid_depth: known_valid.depth(),
            pending_machine: state.pending_state.as_ref().map(|m| m.hash()),
            at_head: state.at_head,
            latest_block: state.latest_block,
        })
    }
}

impl<G: AssertionGraph + 'static> ChainObserver<G> {
    /// Prepares the next assertion on top of the current frontier.
    ///
    /// Inputs are gathered under the read guard; the machine then runs on the
    /// blocking pool with no guard held. Returns `Ok(None)` when the frontier
    /// is not a leaf or the inputs could not be gathered.
    ///
    /// # Errors
    ///
    /// Returns [`ObserverError::NodeNotFound`] if the frontier is missing
    /// from the graph, or [`ObserverError::TaskFailed`] if execution
    /// panicked.
    pub async fn prepare_assertion(
        &self,
        clock: &dyn Clock,
    ) -> Result<Option<PreparedAssertion>, ObserverError> {
        let input = {
            let state = self.read().await;
            let frontier = state.frontier()?;
            let time_bounds = self
                .policy
                .time_bounds(&state.latest_block, clock.now_secs());
            PreparationInput::gather(
                &state.graph,
                state.inbox.as_ref(),
                frontier,
                time_bounds,
                &self.config,
            )
        };
        let Some(input) = input else {
            return Ok(None);
        };

        let prepared = tokio::task::spawn_blocking(move || input.execute())
            .await
            .map_err(|e| ObserverError::task_failed(e.to_string()))?;
        Ok(Some(prepared))
    }
}

/// Inner observer state (mutable part).
pub struct ObserverState<G> {
    graph: G,
    inbox: Arc<dyn Inbox>,
    calculated_valid: Hash,
    known_valid: Hash,
    pending_state: Option<Box<dyn Machine>>,
    at_head: bool,
    latest_block: BlockId,
    listeners: Vec<Arc<dyn ChainListener>>,
}

impl<G: AssertionGraph> ObserverState<G> {
    /// The assertion graph.
    #[must_use]
    pub const fn graph(&self) -> &G {
        &self.graph
    }

    /// The message inbox.
    #[must_use]
    pub fn inbox(&self) -> &dyn Inbox {
        self.inbox.as_ref()
    }

    /// Hash of the verified frontier.
    #[must_use]
    pub const fn frontier_hash(&self) -> Hash {
        self.calculated_valid
    }

    /// The verified frontier.
    ///
    /// # Errors
    ///
    /// Returns [`ObserverError::NodeNotFound`] if the frontier is missing
    /// from the graph.
    pub fn frontier(&self) -> Result<&GraphNode, ObserverError> {
        self.graph
            .node(&self.calculated_valid)
            .ok_or(ObserverError::node_not_found(self.calculated_valid))
    }

    /// The deepest node known to be valid.
    ///
    /// # Errors
    ///
    /// Returns [`ObserverError::NodeNotFound`] if the node is missing from
    /// the graph.
    pub fn known_valid(&self) -> Result<&GraphNode, ObserverError> {
        self.graph
            .node(&self.known_valid)
            .ok_or(ObserverError::node_not_found(self.known_valid))
    }

    /// Machine of the candidate most recently handed to listeners.
    #[must_use]
    pub fn pending_state(&self) -> Option<&dyn Machine> {
        self.pending_state.as_deref()
    }

    /// Whether the validator has caught up with the chain head.
    #[must_use]
    pub const fn at_head(&self) -> bool {
        self.at_head
    }

    /// Latest observed L1 block.
    #[must_use]
    pub const fn latest_block(&self) -> &BlockId {
        &self.latest_block
    }

    /// Records `verdict` on `successor` and moves the frontier to it.
    ///
    /// An invalid successor inherits a copy of the current frontier's
    /// machine. The deepest known valid node follows the frontier whenever
    /// the frontier is deeper.
    pub(crate) fn record_opinion(
        &mut self,
        successor: &Hash,
        verdict: Verdict,
    ) -> Result<(), ObserverError> {
        let parent_machine = if verdict.is_valid() {
            None
        } else {
            self.frontier()?.machine().map(Machine::clone_machine)
        };

        let node = self
            .graph
            .node_mut(successor)
            .ok_or(ObserverError::node_not_found(*successor))?;
        let recorded = match verdict {
            Verdict::Valid { assertion, machine } => node.update_valid_opinion(machine, assertion),
            Verdict::InvalidInboxTop | Verdict::InvalidMessages | Verdict::InvalidExecution => {
                node.update_invalid_opinion(parent_machine)
            },
        };
        if !recorded {
            debug!(node = %short_hex(successor), "Opinion already recorded");
        }
        let depth = node.depth();

        self.calculated_valid = *successor;
        if depth > self.known_valid()?.depth() {
            self.known_valid = *successor;
        }
        Ok(())
    }

    pub(crate) fn set_pending_state(&mut self, machine: Box<dyn Machine>) {
        self.pending_state = Some(machine);
    }

    /// Tells every listener that the frontier moved.
    pub(crate) fn notify_frontier_advanced(&self) -> Result<(), ObserverError> {
        let frontier = self.frontier()?;
        for listener in &self.listeners {
            listener.frontier_advanced(&self.graph, frontier);
        }
        Ok(())
    }

    /// Hands a submittable candidate to every listener.
    pub(crate) fn publish_prepared(
        &self,
        prepared: &PreparedAssertion,
    ) -> Result<(), ObserverError> {
        let known_valid = self.known_valid()?;
        let params = self.graph.params();
        for listener in &self.listeners {
            listener.assertion_prepared(
                &params,
                &self.graph,
                known_valid,
                &self.latest_block,
                prepared,
            );
        }
        Ok(())
    }
}

/// Snapshot returned by [`ChainObserver::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverStatus {
    /// Verified frontier.
    pub frontier: Hash,
    /// Depth of the verified frontier.
    pub frontier_depth: u64,
    /// Deepest node known to be valid.
    pub known_valid: Hash,
    /// Depth of the deepest known valid node.
    pub known_valid_depth: u64,
    /// Hash of the pending candidate's machine, if one was published.
    pub pending_machine: Option<Hash>,
    /// Whether the validator is caught up with the chain head.
    pub at_head: bool,
    /// Latest observed L1 block.
    pub latest_block: BlockId,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use observer_core::protocol::{
        AssertionClaim, AssertionParams, ChildType, DisputableAssertion, ExecutionAssertion,
        TimeBounds,
    };
    use observer_core::testing::{FixedClock, InMemoryGraph, InMemoryInbox, ScriptedMachine};

    use super::*;

    fn observer_at_root() -> (ChainObserver<InMemoryGraph>, InMemoryInbox) {
        let inbox = InMemoryInbox::with_messages(2);
        let graph = InMemoryGraph::with_root(ScriptedMachine::new(7), &inbox);
        let root = graph.root_hash();
        let observer = ChainObserver::new(
            graph,
            Arc::new(inbox.clone()),
            root,
            ObserverConfig::default(),
        )
        .unwrap();
        (observer, inbox)
    }

    fn disputable() -> DisputableAssertion {
        DisputableAssertion {
            params: AssertionParams::default(),
            claim: AssertionClaim::default(),
        }
    }

    #[test]
    fn unknown_frontier_is_rejected() {
        let inbox = InMemoryInbox::new();
        let graph = InMemoryGraph::with_root(ScriptedMachine::new(1), &inbox);
        let result =
            ChainObserver::new(graph, Arc::new(inbox), [3; 32], ObserverConfig::default());
        assert!(matches!(result, Err(ObserverError::NodeNotFound { .. })));
    }

    #[test]
    fn zero_channel_capacity_is_rejected() {
        let inbox = InMemoryInbox::new();
        let graph = InMemoryGraph::with_root(ScriptedMachine::new(1), &inbox);
        let root = graph.root_hash();
        let config = ObserverConfig::default().with_prepared_channel_capacity(0);
        let result = ChainObserver::new(graph, Arc::new(inbox), root, config);
        assert!(matches!(
            result,
            Err(ObserverError::InvalidConfig {
                field: "prepared_channel_capacity",
                ..
            })
        ));
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        let inbox = InMemoryInbox::new();
        let graph = InMemoryGraph::with_root(ScriptedMachine::new(1), &inbox);
        let root = graph.root_hash();
        let config = ObserverConfig::default().with_tick_interval(Duration::ZERO);
        let result = ChainObserver::new(graph, Arc::new(inbox), root, config);
        assert!(matches!(
            result,
            Err(ObserverError::InvalidConfig {
                field: "tick_interval_ms",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn status_reports_initial_frontier() {
        let (observer, _inbox) = observer_at_root();
        observer.set_at_head(true).await;
        observer.set_latest_block(BlockId::new(42, [1; 32])).await;

        let status = observer.status().await.unwrap();
        assert_eq!(status.frontier, status.known_valid);
        assert_eq!(status.frontier_depth, 0);
        assert!(status.at_head);
        assert_eq!(status.latest_block.height, 42);
        assert_eq!(status.pending_machine, None);
    }

    #[tokio::test]
    async fn invalid_successor_inherits_parent_machine() {
        let (observer, _inbox) = observer_at_root();
        let root = observer.read().await.frontier_hash();
        let child = observer
            .update_graph(|graph| graph.add_child(&root, ChildType::InvalidExecution, disputable()))
            .await;

        let mut state = observer.write().await;
        let root_machine = state.frontier().unwrap().machine().unwrap().hash();
        state
            .record_opinion(&child, Verdict::InvalidExecution)
            .unwrap();

        let node = state.frontier().unwrap();
        assert_eq!(node.hash(), child);
        assert_eq!(node.machine().unwrap().hash(), root_machine);
        assert!(node.assertion().is_none());
        assert_eq!(state.known_valid().unwrap().hash(), child);
    }

    #[tokio::test]
    async fn valid_successor_stores_execution() {
        let (observer, _inbox) = observer_at_root();
        let root = observer.read().await.frontier_hash();
        let child = observer
            .update_graph(|graph| graph.add_child(&root, ChildType::Valid, disputable()))
            .await;

        let machine = ScriptedMachine::new(99);
        let expected = machine.hash();
        let mut state = observer.write().await;
        state
            .record_opinion(
                &child,
                Verdict::Valid {
                    assertion: ExecutionAssertion::default(),
                    machine: Box::new(machine),
                },
            )
            .unwrap();

        let node = state.frontier().unwrap();
        assert_eq!(node.machine().unwrap().hash(), expected);
        assert!(node.assertion().is_some());
    }

    #[tokio::test]
    async fn prepare_on_leaf_frontier_runs_machine() {
        let (observer, inbox) = observer_at_root();
        inbox.push(b"late".to_vec());
        observer.set_latest_block(BlockId::new(100, [0; 32])).await;

        let prepared = observer
            .prepare_assertion(&FixedClock::new(1_000))
            .await
            .unwrap()
            .expect("leaf frontier prepares");

        assert_eq!(prepared.prev, observer.read().await.frontier_hash());
        assert_eq!(prepared.params.time_bounds.lower_block, 100);
        assert_eq!(prepared.params.time_bounds.lower_timestamp, 1_000);
        assert_eq!(prepared.params.imported_message_count, 1);
    }

    struct FixedBounds(TimeBounds);

    impl TimeBoundsPolicy for FixedBounds {
        fn time_bounds(&self, _latest: &BlockId, _now_secs: u64) -> TimeBounds {
            self.0
        }
    }

    #[tokio::test]
    async fn custom_policy_sets_prepared_bounds() {
        let (observer, _inbox) = observer_at_root();
        let bounds = TimeBounds {
            lower_block: 7,
            upper_block: 9,
            lower_timestamp: 70,
            upper_timestamp: 90,
        };
        let observer = observer.with_time_bounds_policy(Arc::new(FixedBounds(bounds)));

        let prepared = observer
            .prepare_assertion(&FixedClock::new(1_000))
            .await
            .unwrap()
            .expect("leaf frontier prepares");
        assert_eq!(prepared.params.time_bounds, bounds);
    }

    #[tokio::test]
    async fn prepare_on_inner_frontier_is_none() {
        let (observer, _inbox) = observer_at_root();
        let root = observer.read().await.frontier_hash();
        observer
            .update_graph(|graph| graph.add_child(&root, ChildType::Valid, disputable()))
            .await;

        let prepared = observer
            .prepare_assertion(&FixedClock::new(1_000))
            .await
            .unwrap();
        assert!(prepared.is_none());
    }
}
