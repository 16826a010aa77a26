//! # observer-daemon
//!
//! Background opinion loop for an optimistic-rollup validator.
//!
//! A [`ChainObserver`] owns the validator's view of the assertion graph
//! behind a single reader/writer lock. The [`OpinionLoop`] runs beside the
//! components that feed it (graph ingestion, head sync) and, on every tick:
//!
//! 1. verifies successors of the frontier until it reaches a leaf, reusing a
//!    speculatively prepared assertion when one matches what landed on chain
//! 2. keeps one speculative preparation going on top of a leaf frontier and
//!    hands it to every [`ChainListener`] while it is still submittable
//!
//! ```rust,ignore
//! let observer = Arc::new(ChainObserver::new(graph, inbox, root, config)?);
//! observer.add_listener(Arc::new(Submitter::new(client))).await;
//! let cancel = CancellationToken::new();
//! let handle = spawn_opinion_loop(Arc::clone(&observer), Arc::new(SystemClock), cancel.clone());
//! ```

#![warn(missing_docs)]

pub mod cache;
pub mod listener;
pub mod opinion;
pub mod state;

pub use cache::{Generation, PreparationCache, PreparedDelivery};
pub use listener::ChainListener;
pub use opinion::{spawn_opinion_loop, CatchUpStep, OpinionLoop, ScheduleOutcome};
pub use state::{ChainObserver, ObserverState, ObserverStatus, SharedObserver};
