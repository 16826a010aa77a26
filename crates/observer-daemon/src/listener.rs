//! Notification contract for components that act on the observer's opinions.
//!
//! Listeners are invoked from the opinion loop while it holds a shared read
//! guard on the observer state, never the exclusive guard. They may read the
//! graph they are handed but must not call back into the observer's write
//! paths; anything slow (submitting a transaction, persisting a record)
//! should be handed off to another task.

use observer_core::graph::{AssertionGraph, GraphNode};
use observer_core::preparer::PreparedAssertion;
use observer_core::protocol::{BlockId, ChainParams};

/// Receives frontier advances and submittable candidates.
pub trait ChainListener: Send + Sync {
    /// The locally verified frontier advanced to `node`.
    fn frontier_advanced(&self, graph: &dyn AssertionGraph, node: &GraphNode);

    /// A prepared assertion is within its submission window.
    ///
    /// Called on every loop pass for as long as the candidate stays
    /// submittable and the frontier does not move.
    fn assertion_prepared(
        &self,
        params: &ChainParams,
        graph: &dyn AssertionGraph,
        known_valid: &GraphNode,
        latest_block: &BlockId,
        prepared: &PreparedAssertion,
    );
}
