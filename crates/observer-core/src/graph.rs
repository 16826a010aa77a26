//! Assertion graph contract and graph nodes.
//!
//! The graph itself (storage, leaf tracking, pruning) belongs to the caller.
//! This module defines the node record the opinion loop reads and enriches,
//! and the narrow query surface it needs from the graph.

use serde::{Deserialize, Serialize};

use crate::hash::{is_zero, Hash, ZERO_HASH};
use crate::machine::Machine;
use crate::protocol::{
    ChainParams, ChildType, DisputableAssertion, ExecutionAssertion, VmProtoData,
};

/// Local verdict recorded on a node once its parent has been verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Opinion {
    /// Not yet verified.
    #[default]
    Pending,
    /// The node lies on the valid branch.
    Valid,
    /// The node lies on one of the invalid branches.
    Invalid,
}

/// A committed node of the assertion graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    hash: Hash,
    prev_hash: Hash,
    depth: u64,
    vm_proto_data: VmProtoData,
    successor_hashes: [Hash; 4],
    disputable: Option<DisputableAssertion>,
    machine: Option<Box<dyn Machine>>,
    assertion: Option<ExecutionAssertion>,
    opinion: Opinion,
}

impl GraphNode {
    /// Creates a node proposed by `disputable` on top of `prev_hash`.
    #[must_use]
    pub const fn new(
        hash: Hash,
        prev_hash: Hash,
        depth: u64,
        vm_proto_data: VmProtoData,
        disputable: Option<DisputableAssertion>,
    ) -> Self {
        Self {
            hash,
            prev_hash,
            depth,
            vm_proto_data,
            successor_hashes: [ZERO_HASH; 4],
            disputable,
            machine: None,
            assertion: None,
            opinion: Opinion::Pending,
        }
    }

    /// Creates the trusted root node of a graph with its initial machine.
    #[must_use]
    pub fn root(hash: Hash, vm_proto_data: VmProtoData, machine: Box<dyn Machine>) -> Self {
        let mut node = Self::new(hash, ZERO_HASH, 0, vm_proto_data, None);
        node.machine = Some(machine);
        node.opinion = Opinion::Valid;
        node
    }

    /// Node identity.
    #[must_use]
    pub const fn hash(&self) -> Hash {
        self.hash
    }

    /// Parent identity, zero for the root.
    #[must_use]
    pub const fn prev_hash(&self) -> Hash {
        self.prev_hash
    }

    /// Distance from the root.
    #[must_use]
    pub const fn depth(&self) -> u64 {
        self.depth
    }

    /// Machine and inbox position this node commits to.
    #[must_use]
    pub const fn vm_proto_data(&self) -> &VmProtoData {
        &self.vm_proto_data
    }

    /// Successor hashes indexed by [`ChildType::slot`].
    #[must_use]
    pub const fn successor_hashes(&self) -> &[Hash; 4] {
        &self.successor_hashes
    }

    /// Successor hash for a child type, zero if absent.
    #[must_use]
    pub const fn successor_hash(&self, kind: ChildType) -> Hash {
        self.successor_hashes[kind.slot()]
    }

    /// Registers the successor committed for `kind`.
    pub fn set_successor(&mut self, kind: ChildType, hash: Hash) {
        self.successor_hashes[kind.slot()] = hash;
    }

    /// First non-sentinel successor slot, if any.
    #[must_use]
    pub fn first_successor(&self) -> Option<(ChildType, Hash)> {
        ChildType::ALL
            .into_iter()
            .map(|kind| (kind, self.successor_hash(kind)))
            .find(|(_, hash)| !is_zero(hash))
    }

    /// Params and claim this node was proposed with.
    #[must_use]
    pub const fn disputable(&self) -> Option<&DisputableAssertion> {
        self.disputable.as_ref()
    }

    /// Machine snapshot at this node, known once the node is verified valid.
    #[must_use]
    pub fn machine(&self) -> Option<&dyn Machine> {
        self.machine.as_deref()
    }

    /// Execution result that produced this node, known once verified valid.
    #[must_use]
    pub const fn assertion(&self) -> Option<&ExecutionAssertion> {
        self.assertion.as_ref()
    }

    /// Recorded opinion.
    #[must_use]
    pub const fn opinion(&self) -> Opinion {
        self.opinion
    }

    /// Records that this node is the valid successor of its parent.
    ///
    /// Returns `false` without modifying the node if an opinion was already
    /// recorded.
    pub fn update_valid_opinion(
        &mut self,
        machine: Box<dyn Machine>,
        assertion: ExecutionAssertion,
    ) -> bool {
        if self.opinion != Opinion::Pending {
            return false;
        }
        self.machine = Some(machine);
        self.assertion = Some(assertion);
        self.opinion = Opinion::Valid;
        true
    }

    /// Records that this node lies on an invalid branch.
    ///
    /// An invalid branch continues from the parent's machine state, which the
    /// caller passes as `parent_machine`. Returns `false` without modifying
    /// the node if an opinion was already recorded.
    pub fn update_invalid_opinion(&mut self, parent_machine: Option<Box<dyn Machine>>) -> bool {
        if self.opinion != Opinion::Pending {
            return false;
        }
        self.machine = parent_machine;
        self.assertion = None;
        self.opinion = Opinion::Invalid;
        true
    }
}

/// Append-only DAG of committed assertion nodes.
pub trait AssertionGraph: Send + Sync {
    /// Looks up a node by hash.
    fn node(&self, hash: &Hash) -> Option<&GraphNode>;

    /// Looks up a node by hash for opinion recording.
    fn node_mut(&mut self, hash: &Hash) -> Option<&mut GraphNode>;

    /// Returns `true` if `node` is in the current leaf set.
    fn is_leaf(&self, node: &GraphNode) -> bool;

    /// Graph-wide rollup parameters.
    fn params(&self) -> ChainParams;

    /// The node committed as `parent`'s successor of kind `kind`.
    fn successor(&self, parent: &GraphNode, kind: ChildType) -> Option<&GraphNode> {
        let hash = parent.successor_hash(kind);
        if is_zero(&hash) {
            None
        } else {
            self.node(&hash)
        }
    }
}
