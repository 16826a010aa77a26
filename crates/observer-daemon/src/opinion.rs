//! Background opinion loop.
//!
//! Each pass first walks the verified frontier toward the graph's leaves,
//! classifying one successor per step, then (if the validator is at the
//! chain head) keeps one speculative preparation going on top of the
//! frontier and publishes it to listeners while it is still submittable.
//!
//! Finished preparations come back over a bounded channel and are merged
//! into the [`PreparationCache`] between passes.

use std::sync::Arc;

use observer_core::classifier::{Verdict, VerificationInput};
use observer_core::clock::Clock;
use observer_core::error::ObserverError;
use observer_core::graph::{AssertionGraph, GraphNode};
use observer_core::hash::{short_hex, Hash};
use observer_core::preparer::PreparedAssertion;
use observer_core::window::{check_submission_window, WindowRejection};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{PreparationCache, PreparedDelivery};
use crate::state::SharedObserver;

// ============================================================================
// Loop Outcomes
// ============================================================================

/// Result of one catch-up step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchUpStep {
    /// The frontier is a leaf.
    CaughtUp,
    /// The frontier moved one node deeper.
    Advanced,
    /// The verified outcome's successor is not in the graph yet.
    Waiting,
}

/// Result of one scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Nothing to do: not at head, frontier not a leaf, machine blocked, or
    /// a preparation is still running.
    Idle,
    /// A preparation was launched.
    Launched,
    /// A submittable candidate was handed to listeners.
    Published,
    /// A stale candidate was thrown away.
    Discarded(WindowRejection),
}

enum Pending {
    Reuse(PreparedAssertion),
    Verify(VerificationInput),
}

enum Schedule {
    Launch(Hash),
    Publish(Hash),
    Discard(Hash, WindowRejection),
}

enum Event {
    Shutdown,
    Delivery(PreparedDelivery),
    Tick,
}

// ============================================================================
// Opinion Loop
// ============================================================================

/// Drives frontier verification and speculative preparation.
pub struct OpinionLoop<G> {
    observer: SharedObserver<G>,
    cache: PreparationCache,
    tx: mpsc::Sender<PreparedDelivery>,
    rx: mpsc::Receiver<PreparedDelivery>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl<G: AssertionGraph + 'static> OpinionLoop<G> {
    /// Creates a loop over `observer`.
    #[must_use]
    pub fn new(
        observer: SharedObserver<G>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(observer.config().prepared_channel_capacity);
        Self {
            observer,
            cache: PreparationCache::new(),
            tx,
            rx,
            clock,
            cancel,
        }
    }

    /// Preparation cache, for inspection.
    #[must_use]
    pub const fn cache(&self) -> &PreparationCache {
        &self.cache
    }

    /// Runs until cancelled.
    ///
    /// # Errors
    ///
    /// Returns the first fatal [`ObserverError`]; the loop does not continue
    /// past an inconsistent graph.
    pub async fn run(mut self) -> Result<(), ObserverError> {
        let mut ticker = tokio::time::interval(self.observer.config().tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            tick_interval_ms = self.observer.config().tick_interval_ms,
            "Opinion loop started"
        );

        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Event::Shutdown,
                Some(delivery) = self.rx.recv() => Event::Delivery(delivery),
                _ = ticker.tick() => Event::Tick,
            };

            let result = match event {
                Event::Shutdown => {
                    info!("Opinion loop stopping");
                    return Ok(());
                },
                Event::Delivery(delivery) => self.handle_delivery(delivery).map(|_| ()),
                Event::Tick => self.tick().await,
            };
            if let Err(e) = result {
                error!(error = %e, "Opinion loop stopped on inconsistent graph");
                return Err(e);
            }
        }
    }

    /// One pass: catch up as far as possible, then schedule preparation.
    ///
    /// # Errors
    ///
    /// Returns a fatal [`ObserverError`] if the graph is inconsistent.
    pub async fn tick(&mut self) -> Result<(), ObserverError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            match self.update_current().await? {
                CatchUpStep::Advanced => {},
                CatchUpStep::CaughtUp | CatchUpStep::Waiting => break,
            }
        }
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.schedule_preparation().await.map(|_| ())
    }

    /// Verifies the frontier's successor and advances onto the node at the
    /// verified outcome's slot.
    ///
    /// # Errors
    ///
    /// Returns [`ObserverError::NoSuccessor`] if a non-leaf frontier has no
    /// successor, [`ObserverError::MissingDisputable`] if the successor
    /// carries no params and claim, [`ObserverError::NodeNotFound`] if a
    /// referenced node is missing, or [`ObserverError::TaskFailed`] if
    /// re-execution panicked.
    pub async fn update_current(&mut self) -> Result<CatchUpStep, ObserverError> {
        let (frontier_hash, pending) = {
            let state = self.observer.read().await;
            let frontier = state.frontier()?;
            if state.graph().is_leaf(frontier) {
                return Ok(CatchUpStep::CaughtUp);
            }
            let (_, successor_hash) = frontier
                .first_successor()
                .ok_or(ObserverError::NoSuccessor {
                    node: frontier.hash(),
                })?;
            let successor = state
                .graph()
                .node(&successor_hash)
                .ok_or(ObserverError::node_not_found(successor_hash))?;
            let disputable = successor
                .disputable()
                .ok_or(ObserverError::MissingDisputable {
                    node: successor_hash,
                })?;

            let pending = match self.cache.take_matching(&frontier.hash(), disputable) {
                Some(prepared) => Pending::Reuse(prepared),
                None => Pending::Verify(VerificationInput::gather(
                    state.inbox(),
                    frontier,
                    disputable,
                )?),
            };
            (frontier.hash(), pending)
        };

        let verdict = match pending {
            Pending::Reuse(prepared) => {
                info!(
                    prev = %short_hex(&frontier_hash),
                    steps = prepared.params.num_steps,
                    "Reusing prepared assertion as verified successor"
                );
                Verdict::Valid {
                    assertion: prepared.assertion,
                    machine: prepared.machine,
                }
            },
            Pending::Verify(input) => {
                let imported = input.imported_messages();
                let verdict = tokio::task::spawn_blocking(move || input.classify())
                    .await
                    .map_err(|e| ObserverError::task_failed(e.to_string()))?;
                debug!(
                    prev = %short_hex(&frontier_hash),
                    imported,
                    verdict = %verdict.child_type(),
                    "Classified successor"
                );
                verdict
            },
        };
        self.cache.reset();

        let kind = verdict.child_type();
        let next = {
            let state = self.observer.read().await;
            let frontier = state.frontier()?;
            state.graph().successor(frontier, kind).map(GraphNode::hash)
        };
        let Some(next) = next else {
            info!(
                prev = %short_hex(&frontier_hash),
                kind = %kind,
                "Formed opinion on a node that is not in the graph yet"
            );
            return Ok(CatchUpStep::Waiting);
        };

        self.observer.write().await.record_opinion(&next, verdict)?;

        let state = self.observer.read().await;
        let frontier = state.frontier()?;
        info!(
            node = %short_hex(&next),
            depth = frontier.depth(),
            kind = %kind,
            "Advanced verified frontier"
        );
        state.notify_frontier_advanced()?;
        Ok(CatchUpStep::Advanced)
    }

    /// Launches, publishes or discards the preparation on top of a leaf
    /// frontier.
    ///
    /// # Errors
    ///
    /// Returns [`ObserverError::NodeNotFound`] if the frontier or the
    /// deepest known valid node is missing from the graph.
    pub async fn schedule_preparation(&mut self) -> Result<ScheduleOutcome, ObserverError> {
        let schedule = {
            let state = self.observer.read().await;
            if !state.at_head() {
                return Ok(ScheduleOutcome::Idle);
            }
            let frontier = state.frontier()?;
            if !state.graph().is_leaf(frontier) {
                return Ok(ScheduleOutcome::Idle);
            }
            let hash = frontier.hash();

            if !self.cache.is_preparing(&hash) {
                let Some(machine) = frontier.machine() else {
                    debug!(
                        node = %short_hex(&hash),
                        "Frontier has no machine to prepare from"
                    );
                    return Ok(ScheduleOutcome::Idle);
                };
                let new_messages =
                    frontier.vm_proto_data().inbox_top != state.inbox().top_hash();
                if let Some(reason) = machine.is_blocked(new_messages) {
                    debug!(
                        node = %short_hex(&hash),
                        reason = %reason,
                        "Frontier machine is blocked"
                    );
                    return Ok(ScheduleOutcome::Idle);
                }
                Schedule::Launch(hash)
            } else if let Some(prepared) = self.cache.prepared(&hash) {
                match check_submission_window(
                    &prepared.params.time_bounds,
                    state.latest_block().height,
                    self.clock.now_secs(),
                    self.observer.config().end_cushion_blocks,
                ) {
                    Ok(()) => Schedule::Publish(hash),
                    Err(reason) => Schedule::Discard(hash, reason),
                }
            } else {
                debug!(node = %short_hex(&hash), "Preparation still running");
                return Ok(ScheduleOutcome::Idle);
            }
        };

        match schedule {
            Schedule::Launch(prev) => {
                self.launch_preparation(prev);
                Ok(ScheduleOutcome::Launched)
            },
            Schedule::Publish(prev) => {
                let Some(prepared) = self.cache.prepared(&prev) else {
                    return Ok(ScheduleOutcome::Idle);
                };
                self.observer
                    .write()
                    .await
                    .set_pending_state(prepared.machine.clone_machine());

                let state = self.observer.read().await;
                debug!(
                    prev = %short_hex(&prev),
                    steps = prepared.params.num_steps,
                    latest_block = state.latest_block().height,
                    "Publishing prepared assertion"
                );
                state.publish_prepared(prepared)?;
                Ok(ScheduleOutcome::Published)
            },
            Schedule::Discard(prev, reason) => {
                warn!(
                    prev = %short_hex(&prev),
                    reason = %reason,
                    "Throwing out out of date assertion"
                );
                self.cache.discard(&prev);
                Ok(ScheduleOutcome::Discarded(reason))
            },
        }
    }

    /// Waits for the next preparation to come back and merges it into the
    /// cache. Returns `true` if a candidate was stored.
    ///
    /// # Errors
    ///
    /// Returns the preparation's fatal error, if any.
    pub async fn receive_prepared(&mut self) -> Result<bool, ObserverError> {
        let delivery = self
            .rx
            .recv()
            .await
            .ok_or_else(|| ObserverError::task_failed("preparation channel closed"))?;
        self.handle_delivery(delivery)
    }

    fn handle_delivery(&mut self, delivery: PreparedDelivery) -> Result<bool, ObserverError> {
        let PreparedDelivery {
            generation,
            prev,
            result,
        } = delivery;
        let stored = self.cache.accept(generation, prev, result?);
        if stored {
            debug!(prev = %short_hex(&prev), "Stored prepared assertion");
        }
        Ok(stored)
    }

    fn launch_preparation(&mut self, prev: Hash) {
        let generation = self.cache.mark_preparing(prev);
        let observer = Arc::clone(&self.observer);
        let clock = Arc::clone(&self.clock);
        let tx = self.tx.clone();
        debug!(
            prev = %short_hex(&prev),
            generation = generation.value(),
            "Launching assertion preparation"
        );

        tokio::spawn(async move {
            let result = observer.prepare_assertion(clock.as_ref()).await;
            let delivery = PreparedDelivery {
                generation,
                prev,
                result,
            };
            if tx.send(delivery).await.is_err() {
                debug!("Opinion loop exited before preparation was delivered");
            }
        });
    }
}

/// Spawns the opinion loop on the current runtime.
///
/// The loop stops when `cancel` fires or on the first fatal error, which the
/// returned handle yields.
pub fn spawn_opinion_loop<G: AssertionGraph + 'static>(
    observer: SharedObserver<G>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) -> JoinHandle<Result<(), ObserverError>> {
    tokio::spawn(OpinionLoop::new(observer, clock, cancel).run())
}
