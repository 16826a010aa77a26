//! Error types for opinion formation.
//!
//! Verification failures (a claim that does not match the inbox or the
//! re-executed machine) are not errors: they are verdicts, see
//! [`crate::classifier::Verdict`]. The types here cover the two remaining
//! tiers: external inbox reads that can fail, and invariant violations in the
//! local view of the assertion graph that make further progress unsafe.

use thiserror::Error;

use crate::config::ConfigError;
use crate::hash::{short_hex, Hash};

/// Errors reported by an [`Inbox`](crate::inbox::Inbox) implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InboxError {
    /// The requested index is beyond the known inbox.
    #[error("inbox index {index} out of range (count: {count})")]
    IndexOutOfRange {
        /// The requested index.
        index: u64,
        /// Number of messages known.
        count: u64,
    },

    /// The segment start hash is not a known inbox top.
    #[error("unknown inbox top {}", short_hex(.top))]
    UnknownTop {
        /// The unknown top hash.
        top: Hash,
    },

    /// Fewer messages follow the start hash than requested.
    #[error("segment of {requested} messages exceeds the {available} available")]
    SegmentTooLong {
        /// Number of messages requested.
        requested: u64,
        /// Number of messages available after the start hash.
        available: u64,
    },

    /// The backing store failed.
    #[error("inbox backend error: {0}")]
    Backend(String),
}

/// Fatal errors in the local view of the assertion graph.
///
/// Any of these means an upstream invariant is broken; the opinion loop stops
/// instead of continuing with a corrupt frontier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ObserverError {
    /// A node referenced by the observer is missing from the graph.
    #[error("node {} not found in graph", short_hex(.hash))]
    NodeNotFound {
        /// The missing node hash.
        hash: Hash,
    },

    /// A non-leaf frontier has no non-sentinel successor.
    #[error("node {} has no successor", short_hex(.node))]
    NoSuccessor {
        /// The frontier node.
        node: Hash,
    },

    /// A successor was committed without the params and claim needed to
    /// verify it.
    #[error("node {} was created without a disputable assertion", short_hex(.node))]
    MissingDisputable {
        /// The successor node.
        node: Hash,
    },

    /// The frontier has no machine snapshot to verify against.
    #[error("node {} has no machine snapshot", short_hex(.node))]
    MissingMachine {
        /// The frontier node.
        node: Hash,
    },

    /// The observer was given a configuration it cannot run with.
    #[error("invalid observer setting `{field}`: {reason}")]
    InvalidConfig {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with its value.
        reason: String,
    },

    /// A background execution task panicked or was cancelled.
    #[error("execution task failed: {0}")]
    TaskFailed(String),
}

impl ObserverError {
    /// Creates a node-not-found error.
    #[must_use]
    pub const fn node_not_found(hash: Hash) -> Self {
        Self::NodeNotFound { hash }
    }

    /// Converts a configuration failure into an observer error.
    #[must_use]
    pub fn invalid_config(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::InvalidConfig { field, reason },
            other => Self::InvalidConfig {
                field: "observer",
                reason: other.to_string(),
            },
        }
    }

    /// Creates a task-failed error.
    #[must_use]
    pub fn task_failed(reason: impl Into<String>) -> Self {
        Self::TaskFailed(reason.into())
    }
}
