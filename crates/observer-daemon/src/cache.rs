//! Per-frontier cache of speculative preparations.
//!
//! The opinion loop launches at most one preparation per frontier node and
//! keeps the result here until it is published, reused as a verified
//! successor, or found stale. Both the in-flight set and the results are
//! scoped to a [`Generation`] that changes whenever the frontier moves, so a
//! preparation finishing after the frontier advanced is dropped on arrival.

use std::collections::{HashMap, HashSet};

use observer_core::error::ObserverError;
use observer_core::hash::{short_hex, Hash};
use observer_core::preparer::PreparedAssertion;
use observer_core::protocol::DisputableAssertion;
use tracing::debug;

/// Frontier epoch a cache entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    /// Numeric value, for logging.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// A preparation handed back to the loop by its task.
#[derive(Debug)]
pub struct PreparedDelivery {
    /// Generation the preparation was launched in.
    pub generation: Generation,
    /// Frontier the preparation was launched for.
    pub prev: Hash,
    /// Prepared assertion, `None` if nothing could be prepared.
    pub result: Result<Option<PreparedAssertion>, ObserverError>,
}

/// In-flight and completed preparations for the current generation.
#[derive(Debug, Default)]
pub struct PreparationCache {
    generation: Generation,
    preparing: HashSet<Hash>,
    prepared: HashMap<Hash, PreparedAssertion>,
}

impl PreparationCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation.
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// Returns `true` if a preparation was launched for `prev` and not yet
    /// discarded. Stays set after the result arrives.
    #[must_use]
    pub fn is_preparing(&self, prev: &Hash) -> bool {
        self.preparing.contains(prev)
    }

    /// Marks a preparation for `prev` as in flight.
    ///
    /// Returns the generation the launched task must report back with.
    pub fn mark_preparing(&mut self, prev: Hash) -> Generation {
        self.preparing.insert(prev);
        self.generation
    }

    /// Stores a finished preparation.
    ///
    /// Returns `true` if `prepared` was stored. Results from an older
    /// generation or for a node nothing was launched for are dropped. An
    /// empty result clears the in-flight marker so the next pass can try
    /// again.
    pub fn accept(
        &mut self,
        generation: Generation,
        prev: Hash,
        prepared: Option<PreparedAssertion>,
    ) -> bool {
        if generation != self.generation || !self.preparing.contains(&prev) {
            debug!(
                prev = %short_hex(&prev),
                generation = generation.value(),
                current = self.generation.value(),
                "Dropping late preparation"
            );
            return false;
        }
        match prepared {
            Some(prepared) if prepared.prev == prev => {
                self.prepared.insert(prev, prepared);
                true
            },
            Some(prepared) => {
                debug!(
                    launched_for = %short_hex(&prev),
                    prepared_on = %short_hex(&prepared.prev),
                    "Dropping preparation built on a different frontier"
                );
                self.preparing.remove(&prev);
                false
            },
            None => {
                self.preparing.remove(&prev);
                false
            },
        }
    }

    /// Completed preparation on top of `prev`.
    #[must_use]
    pub fn prepared(&self, prev: &Hash) -> Option<&PreparedAssertion> {
        self.prepared.get(prev)
    }

    /// Removes and returns the preparation on top of `prev` if it commits to
    /// exactly `disputable`.
    pub fn take_matching(
        &mut self,
        prev: &Hash,
        disputable: &DisputableAssertion,
    ) -> Option<PreparedAssertion> {
        if self.prepared.get(prev)?.matches(disputable) {
            self.prepared.remove(prev)
        } else {
            None
        }
    }

    /// Forgets both the in-flight marker and the result for `prev`.
    pub fn discard(&mut self, prev: &Hash) {
        self.preparing.remove(prev);
        self.prepared.remove(prev);
    }

    /// Starts a new generation with nothing in flight and nothing prepared.
    pub fn reset(&mut self) {
        self.generation = self.generation.next();
        self.preparing.clear();
        self.prepared.clear();
    }

    /// Returns `true` if nothing is in flight or prepared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.preparing.is_empty() && self.prepared.is_empty()
    }
}
