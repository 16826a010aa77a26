//! Execution engine contract.
//!
//! The rollup machine is treated as an opaque deterministic function: given
//! the same starting state, step limit, time bounds and inbox segment it must
//! always produce the same [`ExecutionAssertion`] and step count. Nothing in
//! this crate interprets the program being executed.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::hash::Hash;
use crate::inbox::MessageSegment;
use crate::protocol::{ExecutionAssertion, TimeBounds};

/// Why a machine cannot make progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReason {
    /// The machine halted.
    Halted,
    /// The machine hit an error state.
    Error,
    /// The machine is waiting for inbox messages that have not arrived.
    Inbox {
        /// Inbox hash the machine is waiting on.
        inbox: Hash,
    },
    /// The machine is waiting on a breakpoint.
    Breakpoint,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Halted => f.write_str("halted"),
            Self::Error => f.write_str("error"),
            Self::Inbox { .. } => f.write_str("inbox"),
            Self::Breakpoint => f.write_str("breakpoint"),
        }
    }
}

/// Deterministic rollup machine.
pub trait Machine: Send + Sync + fmt::Debug {
    /// Returns an independent copy of this machine.
    fn clone_machine(&self) -> Box<dyn Machine>;

    /// Content hash of the current machine state.
    fn hash(&self) -> Hash;

    /// Reports why the machine cannot run, if it cannot.
    ///
    /// `new_messages` tells the machine whether unread inbox messages exist;
    /// a machine waiting on the inbox is only blocked when there are none.
    fn is_blocked(&self, new_messages: bool) -> Option<BlockReason>;

    /// Runs up to `max_steps` steps over `inbox`.
    ///
    /// Execution stops early when the machine blocks or when
    /// `max_wall_time` elapses; a zero `max_wall_time` means no wall-clock
    /// cap. Returns the execution result and the number of steps run.
    fn execute_assertion(
        &mut self,
        max_steps: u64,
        time_bounds: &TimeBounds,
        inbox: &MessageSegment,
        max_wall_time: Duration,
    ) -> (ExecutionAssertion, u64);
}

impl Clone for Box<dyn Machine> {
    fn clone(&self) -> Self {
        self.clone_machine()
    }
}
