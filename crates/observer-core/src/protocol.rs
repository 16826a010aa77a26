//! Assertion protocol types shared by the classifier, the preparer and the
//! assertion graph.
//!
//! An assertion is a claimed state transition of the rollup machine. It is
//! described by [`AssertionParams`] (how far to execute, within which time
//! bounds, importing how many inbox messages) and an [`AssertionClaim`] (what
//! the inbox and the machine look like afterwards). Every committed assertion
//! has exactly four potential successors in the graph, one per [`ChildType`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hash::{chain_hash, Hash, ZERO_HASH};

// ============================================================================
// Child Types
// ============================================================================

/// Outcome kind of a verified assertion, and the successor slot it selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChildType {
    /// The claimed transition was reproduced exactly.
    Valid,
    /// The claimed after-inbox-top does not match the inbox.
    InvalidInboxTop,
    /// The claimed imported message slice does not match the inbox.
    InvalidMessages,
    /// Re-execution diverged from the claimed step count or stub.
    InvalidExecution,
}

impl ChildType {
    /// All child types in successor-slot order.
    pub const ALL: [Self; 4] = [
        Self::Valid,
        Self::InvalidInboxTop,
        Self::InvalidMessages,
        Self::InvalidExecution,
    ];

    /// Index of this child type in a node's successor array.
    #[must_use]
    pub const fn slot(self) -> usize {
        match self {
            Self::Valid => 0,
            Self::InvalidInboxTop => 1,
            Self::InvalidMessages => 2,
            Self::InvalidExecution => 3,
        }
    }

    /// Returns the child type as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::InvalidInboxTop => "INVALID_INBOX_TOP",
            Self::InvalidMessages => "INVALID_MESSAGES",
            Self::InvalidExecution => "INVALID_EXECUTION",
        }
    }
}

impl fmt::Display for ChildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Chain Context
// ============================================================================

/// Identity of an L1 block observed by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockId {
    /// Block height.
    pub height: u64,
    /// Block header hash.
    pub header_hash: Hash,
}

impl BlockId {
    /// Creates a block identity.
    #[must_use]
    pub const fn new(height: u64, header_hash: Hash) -> Self {
        Self {
            height,
            header_hash,
        }
    }
}

/// Graph-wide rollup parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    /// Maximum number of machine steps a single assertion may cover.
    pub max_execution_steps: u64,
    /// Number of blocks a node stays challengeable.
    pub grace_period_blocks: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            max_execution_steps: 1_000_000,
            grace_period_blocks: 240,
        }
    }
}

// ============================================================================
// Assertion Params and Claim
// ============================================================================

/// Inclusive block and timestamp window an assertion is valid in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeBounds {
    /// Lowest block height the assertion may be included at.
    pub lower_block: u64,
    /// Highest block height the assertion may be included at.
    pub upper_block: u64,
    /// Lowest block timestamp (UNIX seconds).
    pub lower_timestamp: u64,
    /// Highest block timestamp (UNIX seconds).
    pub upper_timestamp: u64,
}

impl TimeBounds {
    /// Number of blocks covered by the window.
    #[must_use]
    pub const fn block_span(&self) -> u64 {
        self.upper_block.saturating_sub(self.lower_block)
    }
}

/// Execution parameters of an assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssertionParams {
    /// Exact number of machine steps covered.
    pub num_steps: u64,
    /// Window the assertion is valid in.
    pub time_bounds: TimeBounds,
    /// Number of inbox messages imported before execution.
    pub imported_message_count: u64,
}

/// Claimed outcome of an assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssertionClaim {
    /// Inbox top hash after importing the messages.
    pub after_inbox_top: Hash,
    /// Hash of the imported message segment.
    pub imported_messages_slice: Hash,
    /// Digest of the execution result.
    pub assertion_stub: ExecutionAssertionStub,
}

/// Params and claim attached to a node proposed by an asserter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputableAssertion {
    /// Execution parameters.
    pub params: AssertionParams,
    /// Claimed outcome.
    pub claim: AssertionClaim,
}

impl DisputableAssertion {
    /// Returns `true` if the pair matches `params` and `claim` exactly.
    #[must_use]
    pub fn matches(&self, params: &AssertionParams, claim: &AssertionClaim) -> bool {
        self.params == *params && self.claim == *claim
    }
}

// ============================================================================
// Execution Results
// ============================================================================

/// Full result of running a machine for a bounded number of steps.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionAssertion {
    /// Machine hash after execution.
    pub after_hash: Hash,
    /// Whether an inbox-consuming instruction ran.
    pub did_inbox_insn: bool,
    /// Gas consumed.
    pub num_gas: u64,
    /// Messages sent by the machine, in order.
    pub out_messages: Vec<Vec<u8>>,
    /// Logs emitted by the machine, in order.
    pub logs: Vec<Vec<u8>>,
}

/// Compact digest of an [`ExecutionAssertion`].
///
/// Two executions with equal stubs are treated as equal results; the output
/// message and log lists are committed to by hash chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionAssertionStub {
    /// Machine hash after execution.
    pub after_hash: Hash,
    /// Whether an inbox-consuming instruction ran.
    pub did_inbox_insn: bool,
    /// Gas consumed.
    pub num_gas: u64,
    /// Last link of the out-message hash chain.
    pub last_message_hash: Hash,
    /// Last link of the log hash chain.
    pub last_log_hash: Hash,
}

impl ExecutionAssertionStub {
    /// Derives the stub of an execution result.
    #[must_use]
    pub fn from_assertion(assertion: &ExecutionAssertion) -> Self {
        Self {
            after_hash: assertion.after_hash,
            did_inbox_insn: assertion.did_inbox_insn,
            num_gas: assertion.num_gas,
            last_message_hash: fold_chain(&assertion.out_messages),
            last_log_hash: fold_chain(&assertion.logs),
        }
    }
}

impl ExecutionAssertion {
    /// Derives the stub of this result.
    #[must_use]
    pub fn stub(&self) -> ExecutionAssertionStub {
        ExecutionAssertionStub::from_assertion(self)
    }
}

fn fold_chain(items: &[Vec<u8>]) -> Hash {
    items
        .iter()
        .fold(ZERO_HASH, |acc, item| chain_hash(&acc, item))
}

// ============================================================================
// VM Proto State
// ============================================================================

/// Summary of the machine and inbox position a node commits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VmProtoData {
    /// Hash of the machine state.
    pub machine_hash: Hash,
    /// Inbox top hash at this node.
    pub inbox_top: Hash,
    /// Number of inbox messages consumed up to this node.
    pub inbox_count: u64,
}
