//! Verification of proposed assertions.
//!
//! [`classify`] decides which of the four successor slots of a node is the
//! correct continuation of the chain. Checks run cheapest first and stop at
//! the first mismatch, so a claim that is already wrong about the inbox never
//! triggers re-execution.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ObserverError;
use crate::graph::GraphNode;
use crate::hash::{short_hex, Hash};
use crate::inbox::{Inbox, MessageSegment};
use crate::machine::Machine;
use crate::protocol::{
    AssertionClaim, AssertionParams, ChildType, DisputableAssertion, ExecutionAssertion,
};

/// Outcome of verifying an assertion.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// The assertion was reproduced exactly.
    Valid {
        /// Full execution result.
        assertion: ExecutionAssertion,
        /// Machine state after execution.
        machine: Box<dyn Machine>,
    },
    /// The claimed after-inbox-top is wrong or could not be resolved.
    InvalidInboxTop,
    /// The claimed imported message slice is wrong.
    InvalidMessages,
    /// Re-execution diverged from the claim.
    InvalidExecution,
}

impl Verdict {
    /// Successor slot selected by this verdict.
    #[must_use]
    pub const fn child_type(&self) -> ChildType {
        match self {
            Self::Valid { .. } => ChildType::Valid,
            Self::InvalidInboxTop => ChildType::InvalidInboxTop,
            Self::InvalidMessages => ChildType::InvalidMessages,
            Self::InvalidExecution => ChildType::InvalidExecution,
        }
    }

    /// Returns `true` for [`Verdict::Valid`].
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

/// Classifies a proposed assertion against locally observed inputs.
///
/// `after_inbox_top` is the inbox top at the claimed import position, `None`
/// if it could not be read. `messages_slice` is the hash of the segment the
/// assertion should have imported and `messages` its content. `machine` is
/// cloned before execution and is never modified.
#[must_use]
pub fn classify(
    params: &AssertionParams,
    claim: &AssertionClaim,
    after_inbox_top: Option<&Hash>,
    messages_slice: &Hash,
    messages: &MessageSegment,
    machine: &dyn Machine,
) -> Verdict {
    if after_inbox_top != Some(&claim.after_inbox_top) {
        debug!(
            claimed = %short_hex(&claim.after_inbox_top),
            "Saw node with invalid after inbox top claim"
        );
        return Verdict::InvalidInboxTop;
    }
    if *messages_slice != claim.imported_messages_slice {
        debug!(
            claimed = %short_hex(&claim.imported_messages_slice),
            "Saw node with invalid imported messages claim"
        );
        return Verdict::InvalidMessages;
    }

    let mut machine = machine.clone_machine();
    let (assertion, steps_run) = machine.execute_assertion(
        params.num_steps,
        &params.time_bounds,
        messages,
        Duration::ZERO,
    );
    if steps_run != params.num_steps || assertion.stub() != claim.assertion_stub {
        debug!(
            claimed_steps = params.num_steps,
            steps_run, "Saw node with invalid execution claim"
        );
        return Verdict::InvalidExecution;
    }

    Verdict::Valid { assertion, machine }
}

/// Inputs for verifying one successor, gathered while the graph is readable.
///
/// Gathering touches only the inbox and the frontier node; [`Self::classify`]
/// does the expensive part and needs no access to shared state.
#[derive(Debug, Clone)]
pub struct VerificationInput {
    params: AssertionParams,
    claim: AssertionClaim,
    after_inbox_top: Option<Hash>,
    segment: MessageSegment,
    machine: Box<dyn Machine>,
}

impl VerificationInput {
    /// Collects the inputs needed to verify `disputable` on top of
    /// `frontier`.
    ///
    /// Inbox read failures are folded into the inputs: an unreadable inbox
    /// top becomes `None` and an unreadable segment becomes the empty
    /// segment, both of which classify deterministically.
    ///
    /// # Errors
    ///
    /// Returns [`ObserverError::MissingMachine`] if the frontier has no
    /// machine snapshot.
    pub fn gather(
        inbox: &dyn Inbox,
        frontier: &GraphNode,
        disputable: &DisputableAssertion,
    ) -> Result<Self, ObserverError> {
        let machine = frontier
            .machine()
            .ok_or(ObserverError::MissingMachine {
                node: frontier.hash(),
            })?
            .clone_machine();
        let proto = frontier.vm_proto_data();
        let imported = disputable.params.imported_message_count;

        let after_inbox_top = match proto
            .inbox_count
            .checked_add(imported)
            .map(|index| inbox.hash_at_index(index))
        {
            Some(Ok(hash)) => Some(hash),
            Some(Err(e)) => {
                warn!(error = %e, "Failed to resolve after inbox top");
                None
            },
            None => None,
        };
        let segment = inbox
            .generate_segment(&proto.inbox_top, imported)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to generate inbox segment");
                MessageSegment::empty()
            });

        Ok(Self {
            params: disputable.params,
            claim: disputable.claim,
            after_inbox_top,
            segment,
            machine,
        })
    }

    /// Number of messages the verified assertion imports.
    #[must_use]
    pub fn imported_messages(&self) -> usize {
        self.segment.len()
    }

    /// Runs [`classify`] over the gathered inputs.
    #[must_use]
    pub fn classify(&self) -> Verdict {
        classify(
            &self.params,
            &self.claim,
            self.after_inbox_top.as_ref(),
            &self.segment.hash(),
            &self.segment,
            self.machine.as_ref(),
        )
    }
}
