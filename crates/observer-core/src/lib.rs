//! # observer-core
//!
//! Opinion formation primitives for an optimistic-rollup validator.
//!
//! A validator keeps its own view of which assertions committed on chain are
//! valid. It forms that view by re-executing each disputed transition against
//! its local copy of the rollup machine and inbox, and it speculatively
//! prepares the next assertion it would like to propose. This crate holds the
//! synchronous, deterministic part of that work:
//!
//! - [`classifier`]: four-outcome verification of a proposed assertion
//! - [`preparer`]: speculative preparation of the next assertion
//! - [`window`]: submission window check for prepared assertions
//! - [`graph`], [`inbox`], [`machine`]: contracts for the assertion graph,
//!   the message inbox and the execution engine, all owned by the caller
//!
//! The background loop that drives these pieces lives in `observer-daemon`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use observer_core::classifier::{classify, Verdict};
//! use observer_core::inbox::MessageSegment;
//! use observer_core::protocol::{AssertionClaim, AssertionParams};
//! use observer_core::testing::ScriptedMachine;
//!
//! let machine = ScriptedMachine::new(1);
//! let claim = AssertionClaim::default();
//! let verdict = classify(
//!     &AssertionParams::default(),
//!     &claim,
//!     None,
//!     &MessageSegment::empty_hash(),
//!     &MessageSegment::empty(),
//!     &machine,
//! );
//! assert!(matches!(verdict, Verdict::InvalidInboxTop));
//! ```

#![warn(missing_docs)]

pub mod classifier;
pub mod clock;
pub mod config;
pub mod error;
pub mod graph;
pub mod hash;
pub mod inbox;
pub mod machine;
pub mod preparer;
pub mod protocol;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod window;

pub use classifier::{classify, Verdict, VerificationInput};
pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, ObserverConfig};
pub use error::{InboxError, ObserverError};
pub use graph::{AssertionGraph, GraphNode, Opinion};
pub use hash::{Hash, ZERO_HASH};
pub use inbox::{Inbox, MessageSegment};
pub use machine::{BlockReason, Machine};
pub use preparer::{PreparationInput, PreparedAssertion, TimeBoundsPolicy, WindowPolicy};
pub use protocol::{
    AssertionClaim, AssertionParams, BlockId, ChainParams, ChildType, DisputableAssertion,
    ExecutionAssertion, ExecutionAssertionStub, TimeBounds, VmProtoData,
};
pub use window::{check_submission_window, WindowRejection};
