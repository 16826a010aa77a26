//! Inbox contract and verifiable message segments.

use serde::{Deserialize, Serialize};

use crate::error::InboxError;
use crate::hash::{chain_hash, hash_bytes, Hash};

/// Ordered message log feeding the rollup machine.
///
/// Index `n` identifies the inbox top after `n` messages have been appended,
/// so `hash_at_index(top_count())` equals `top_hash()`.
pub trait Inbox: Send + Sync {
    /// Returns the inbox top hash after `index` messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is beyond the known inbox or the backing
    /// store cannot be read.
    fn hash_at_index(&self, index: u64) -> Result<Hash, InboxError>;

    /// Builds a segment of `count` messages following the inbox top
    /// `from_top`.
    ///
    /// # Errors
    ///
    /// Returns an error if `from_top` is unknown or fewer than `count`
    /// messages follow it.
    fn generate_segment(&self, from_top: &Hash, count: u64) -> Result<MessageSegment, InboxError>;

    /// Total number of messages in the inbox.
    fn top_count(&self) -> u64;

    /// Current inbox top hash.
    fn top_hash(&self) -> Hash;
}

/// A contiguous run of inbox messages together with its commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSegment {
    messages: Vec<Vec<u8>>,
    hash: Hash,
}

impl MessageSegment {
    /// Builds a segment and computes its hash.
    #[must_use]
    pub fn new(messages: Vec<Vec<u8>>) -> Self {
        let hash = messages
            .iter()
            .fold(Self::empty_hash(), |acc, message| chain_hash(&acc, message));
        Self { messages, hash }
    }

    /// The segment containing no messages.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Canonical hash of an empty segment.
    #[must_use]
    pub fn empty_hash() -> Hash {
        hash_bytes(&[])
    }

    /// Segment commitment.
    #[must_use]
    pub const fn hash(&self) -> Hash {
        self.hash
    }

    /// Messages in the segment.
    #[must_use]
    pub fn messages(&self) -> &[Vec<u8>] {
        &self.messages
    }

    /// Number of messages in the segment.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the segment holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for MessageSegment {
    fn default() -> Self {
        Self::empty()
    }
}
