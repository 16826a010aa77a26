//! Speculative preparation of the next assertion.
//!
//! A validator that is caught up with the chain runs its own machine ahead of
//! the frontier so that a ready-made assertion exists by the time it wants to
//! submit one. Preparation is split in two:
//!
//! 1. [`PreparationInput::gather`] snapshots everything it needs from the
//!    graph and the inbox. This is the only part that needs shared state.
//! 2. [`PreparationInput::execute`] runs the machine, which can take as long
//!    as the wall-clock budget allows, with no access to shared state.
//!
//! The resulting [`PreparedAssertion`] always describes exactly what was
//! executed, so it can later be compared field-for-field against an assertion
//! that shows up on chain.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::ObserverConfig;
use crate::graph::{AssertionGraph, GraphNode};
use crate::hash::{short_hex, Hash};
use crate::inbox::{Inbox, MessageSegment};
use crate::machine::Machine;
use crate::protocol::{
    AssertionClaim, AssertionParams, BlockId, DisputableAssertion, ExecutionAssertion,
    TimeBounds, VmProtoData,
};

// ============================================================================
// Time Bounds Policy
// ============================================================================

/// Chooses the time bounds a freshly prepared assertion commits to.
pub trait TimeBoundsPolicy: Send + Sync {
    /// Time bounds for an assertion prepared at `latest` block and wall-clock
    /// `now_secs`.
    fn time_bounds(&self, latest: &BlockId, now_secs: u64) -> TimeBounds;
}

/// Window starting at the latest block and the current time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    /// Number of blocks the window spans.
    pub window_blocks: u64,
    /// Number of seconds the window spans.
    pub window_secs: u64,
}

impl WindowPolicy {
    /// Builds the policy from observer configuration.
    #[must_use]
    pub const fn from_config(config: &ObserverConfig) -> Self {
        Self {
            window_blocks: config.time_bounds_window_blocks,
            window_secs: config.time_bounds_window_secs,
        }
    }
}

impl TimeBoundsPolicy for WindowPolicy {
    fn time_bounds(&self, latest: &BlockId, now_secs: u64) -> TimeBounds {
        TimeBounds {
            lower_block: latest.height,
            upper_block: latest.height.saturating_add(self.window_blocks),
            lower_timestamp: now_secs,
            upper_timestamp: now_secs.saturating_add(self.window_secs),
        }
    }
}

/// Wall-clock budget for speculative execution within `time_bounds`.
///
/// One `divisor`-th of the window's block span, converted to time at
/// `block_time` per block.
#[must_use]
pub fn run_budget(time_bounds: &TimeBounds, divisor: u64, block_time: Duration) -> Duration {
    let run_blocks = time_bounds.block_span() / divisor.max(1);
    block_time.saturating_mul(u32::try_from(run_blocks).unwrap_or(u32::MAX))
}

// ============================================================================
// Prepared Assertion
// ============================================================================

/// A speculatively executed assertion on top of a frontier node.
#[derive(Debug, Clone)]
pub struct PreparedAssertion {
    /// Node the assertion builds on.
    pub prev: Hash,
    /// Machine and inbox position before execution.
    pub before_state: VmProtoData,
    /// Parameters matching what was executed.
    pub params: AssertionParams,
    /// Claim matching what was executed.
    pub claim: AssertionClaim,
    /// Full execution result.
    pub assertion: ExecutionAssertion,
    /// Machine state after execution.
    pub machine: Box<dyn Machine>,
}

impl PreparedAssertion {
    /// Returns `true` if `disputable` commits to exactly this assertion.
    #[must_use]
    pub fn matches(&self, disputable: &DisputableAssertion) -> bool {
        disputable.matches(&self.params, &self.claim)
    }

    /// The params and claim pair as it would be proposed on chain.
    #[must_use]
    pub const fn disputable(&self) -> DisputableAssertion {
        DisputableAssertion {
            params: self.params,
            claim: self.claim,
        }
    }
}

// ============================================================================
// Preparation
// ============================================================================

/// Snapshot of everything needed to prepare an assertion.
#[derive(Debug, Clone)]
pub struct PreparationInput {
    prev: Hash,
    before_state: VmProtoData,
    after_inbox_top: Hash,
    new_message_count: u64,
    segment: MessageSegment,
    machine: Box<dyn Machine>,
    time_bounds: TimeBounds,
    max_steps: u64,
    run_budget: Duration,
}

impl PreparationInput {
    /// Snapshots the inputs for preparing on top of `frontier`.
    ///
    /// Returns `None` when there is nothing worth preparing: the frontier
    /// already has a successor awaiting resolution, it has no machine
    /// snapshot, or the inbox segment cannot be read.
    #[must_use]
    pub fn gather(
        graph: &dyn AssertionGraph,
        inbox: &dyn Inbox,
        frontier: &GraphNode,
        time_bounds: TimeBounds,
        config: &ObserverConfig,
    ) -> Option<Self> {
        if !graph.is_leaf(frontier) {
            return None;
        }
        let Some(machine) = frontier.machine() else {
            warn!(
                node = %short_hex(&frontier.hash()),
                "Cannot prepare on a node without a machine snapshot"
            );
            return None;
        };

        let before_state = *frontier.vm_proto_data();
        let after_inbox_top = inbox.top_hash();
        let new_message_count = inbox.top_count().saturating_sub(before_state.inbox_count);
        let segment = match inbox.generate_segment(&before_state.inbox_top, new_message_count) {
            Ok(segment) => segment,
            Err(e) => {
                warn!(error = %e, "Failed to generate inbox segment for preparation");
                return None;
            },
        };
        let run_budget = run_budget(&time_bounds, config.run_budget_divisor, config.block_time());

        info!(
            lower_block = time_bounds.lower_block,
            upper_block = time_bounds.upper_block,
            run_budget_ms = u64::try_from(run_budget.as_millis()).unwrap_or(u64::MAX),
            "Gathered preparation inputs"
        );

        Some(Self {
            prev: frontier.hash(),
            before_state,
            after_inbox_top,
            new_message_count,
            segment,
            machine: machine.clone_machine(),
            time_bounds,
            max_steps: graph.params().max_execution_steps,
            run_budget,
        })
    }

    /// Node the preparation builds on.
    #[must_use]
    pub const fn prev(&self) -> Hash {
        self.prev
    }

    /// Time bounds the prepared assertion will commit to.
    #[must_use]
    pub const fn time_bounds(&self) -> &TimeBounds {
        &self.time_bounds
    }

    /// Wall-clock budget for execution.
    #[must_use]
    pub const fn run_budget(&self) -> Duration {
        self.run_budget
    }

    /// Runs the machine and builds the prepared assertion.
    #[must_use]
    pub fn execute(self) -> PreparedAssertion {
        let Self {
            prev,
            before_state,
            after_inbox_top,
            new_message_count,
            segment,
            mut machine,
            time_bounds,
            max_steps,
            run_budget,
        } = self;

        let before_hash = machine.hash();
        let (assertion, steps_run) =
            machine.execute_assertion(max_steps, &time_bounds, &segment, run_budget);
        let after_hash = machine.hash();
        let block_reason = machine.is_blocked(false);

        info!(
            steps_run,
            before = %short_hex(&before_hash),
            after = %short_hex(&after_hash),
            block_reason = ?block_reason,
            lower_block = time_bounds.lower_block,
            upper_block = time_bounds.upper_block,
            prev = %short_hex(&prev),
            "Prepared assertion"
        );

        let stub = assertion.stub();
        let (params, claim) = if assertion.did_inbox_insn {
            (
                AssertionParams {
                    num_steps: steps_run,
                    time_bounds,
                    imported_message_count: new_message_count,
                },
                AssertionClaim {
                    after_inbox_top,
                    imported_messages_slice: segment.hash(),
                    assertion_stub: stub,
                },
            )
        } else {
            (
                AssertionParams {
                    num_steps: steps_run,
                    time_bounds,
                    imported_message_count: 0,
                },
                AssertionClaim {
                    after_inbox_top: before_state.inbox_top,
                    imported_messages_slice: MessageSegment::empty_hash(),
                    assertion_stub: stub,
                },
            )
        };

        PreparedAssertion {
            prev,
            before_state,
            params,
            claim,
            assertion,
            machine,
        }
    }
}
