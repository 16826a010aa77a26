//! In-memory collaborators for tests.
//!
//! Compiled for unit tests and under the `test-support` feature so that
//! integration tests and downstream crates can drive the opinion loop
//! without a real chain, inbox store or rollup machine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use crate::clock::Clock;
use crate::error::InboxError;
use crate::graph::{AssertionGraph, GraphNode};
use crate::hash::{chain_hash, hash_bytes, Hash};
use crate::inbox::{Inbox, MessageSegment};
use crate::machine::{BlockReason, Machine};
use crate::protocol::{
    ChainParams, ChildType, DisputableAssertion, ExecutionAssertion, TimeBounds, VmProtoData,
};

// ============================================================================
// Inbox
// ============================================================================

#[derive(Debug)]
struct InboxLog {
    messages: Vec<Vec<u8>>,
    tops: Vec<Hash>,
    fail_reads: bool,
}

/// Append-only inbox shared between the test and the observer.
#[derive(Debug, Clone)]
pub struct InMemoryInbox {
    log: Arc<RwLock<InboxLog>>,
}

impl InMemoryInbox {
    /// Creates an empty inbox.
    #[must_use]
    pub fn new() -> Self {
        Self {
            log: Arc::new(RwLock::new(InboxLog {
                messages: Vec::new(),
                tops: vec![hash_bytes(b"inbox-genesis")],
                fail_reads: false,
            })),
        }
    }

    /// Creates an inbox holding `count` generated messages.
    #[must_use]
    pub fn with_messages(count: u64) -> Self {
        let inbox = Self::new();
        for i in 0..count {
            inbox.push(format!("message-{i}").into_bytes());
        }
        inbox
    }

    /// Appends a message.
    pub fn push(&self, message: Vec<u8>) {
        let mut log = self.log.write().unwrap_or_else(PoisonError::into_inner);
        let top = *log.tops.last().unwrap_or(&hash_bytes(b"inbox-genesis"));
        log.tops.push(chain_hash(&top, &message));
        log.messages.push(message);
    }

    /// Makes every subsequent read fail with a backend error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.log
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_reads = fail;
    }
}

impl Default for InMemoryInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Inbox for InMemoryInbox {
    fn hash_at_index(&self, index: u64) -> Result<Hash, InboxError> {
        let log = self.log.read().unwrap_or_else(PoisonError::into_inner);
        if log.fail_reads {
            return Err(InboxError::Backend("reads disabled".to_string()));
        }
        usize::try_from(index)
            .ok()
            .and_then(|i| log.tops.get(i).copied())
            .ok_or(InboxError::IndexOutOfRange {
                index,
                count: log.messages.len() as u64,
            })
    }

    fn generate_segment(&self, from_top: &Hash, count: u64) -> Result<MessageSegment, InboxError> {
        let log = self.log.read().unwrap_or_else(PoisonError::into_inner);
        if log.fail_reads {
            return Err(InboxError::Backend("reads disabled".to_string()));
        }
        let start = log
            .tops
            .iter()
            .position(|top| top == from_top)
            .ok_or(InboxError::UnknownTop { top: *from_top })?;
        let available = (log.messages.len() - start) as u64;
        if count > available {
            return Err(InboxError::SegmentTooLong {
                requested: count,
                available,
            });
        }
        let end = start + usize::try_from(count).unwrap_or(usize::MAX);
        Ok(MessageSegment::new(log.messages[start..end].to_vec()))
    }

    fn top_count(&self) -> u64 {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .messages
            .len() as u64
    }

    fn top_hash(&self) -> Hash {
        let log = self.log.read().unwrap_or_else(PoisonError::into_inner);
        log.tops.last().copied().unwrap_or_default()
    }
}

// ============================================================================
// Machine
// ============================================================================

/// One call to [`Machine::execute_assertion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    /// Step limit passed in.
    pub max_steps: u64,
    /// Wall-clock budget passed in.
    pub max_wall_time: Duration,
    /// Messages in the segment passed in.
    pub messages: usize,
    /// Steps actually run.
    pub steps_run: u64,
}

/// Execution history shared by a machine and all of its clones.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    records: Arc<Mutex<Vec<ExecutionRecord>>>,
}

impl ExecutionLog {
    /// All recorded executions in order.
    #[must_use]
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded executions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing has executed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, record: ExecutionRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

/// Deterministic stand-in for the rollup machine.
///
/// Each step advances a counter; consuming inbox messages folds them into the
/// state hash and echoes them as logs. Clones share an [`ExecutionLog`] so
/// tests can tell whether any copy of a machine was run.
#[derive(Debug, Clone)]
pub struct ScriptedMachine {
    seed: u64,
    position: u64,
    consumed: Hash,
    step_limit: Option<u64>,
    waits_for_inbox: bool,
    log: ExecutionLog,
}

impl ScriptedMachine {
    /// Creates a machine whose state is derived from `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            position: 0,
            consumed: [0; 32],
            step_limit: None,
            waits_for_inbox: false,
            log: ExecutionLog::default(),
        }
    }

    /// Halts the machine after `limit` total steps.
    #[must_use]
    pub const fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = Some(limit);
        self
    }

    /// Reports the machine as blocked on the inbox when no new messages
    /// exist.
    #[must_use]
    pub const fn waiting_for_inbox(mut self) -> Self {
        self.waits_for_inbox = true;
        self
    }

    /// Shared execution history.
    #[must_use]
    pub fn execution_log(&self) -> ExecutionLog {
        self.log.clone()
    }

    /// Number of executions across this machine and its clones.
    #[must_use]
    pub fn executions(&self) -> usize {
        self.log.len()
    }

    /// Result that running `steps` steps over `segment` would produce,
    /// without recording an execution.
    #[must_use]
    pub fn expected_assertion(&self, steps: u64, segment: &MessageSegment) -> ExecutionAssertion {
        let mut copy = self.clone();
        copy.log = ExecutionLog::default();
        copy.run(steps, segment).0
    }

    fn run(&mut self, max_steps: u64, inbox: &MessageSegment) -> (ExecutionAssertion, u64) {
        let steps = match self.step_limit {
            Some(limit) => max_steps.min(limit.saturating_sub(self.position)),
            None => max_steps,
        };
        let did_inbox_insn = steps > 0 && !inbox.is_empty();
        if did_inbox_insn {
            self.consumed = inbox
                .messages()
                .iter()
                .fold(self.consumed, |acc, message| chain_hash(&acc, message));
        }
        self.position += steps;

        let assertion = ExecutionAssertion {
            after_hash: self.hash(),
            did_inbox_insn,
            num_gas: steps.saturating_mul(3),
            out_messages: if steps > 0 {
                vec![self.position.to_le_bytes().to_vec()]
            } else {
                Vec::new()
            },
            logs: if did_inbox_insn {
                inbox.messages().to_vec()
            } else {
                Vec::new()
            },
        };
        (assertion, steps)
    }
}

impl Machine for ScriptedMachine {
    fn clone_machine(&self) -> Box<dyn Machine> {
        Box::new(self.clone())
    }

    fn hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(&self.position.to_le_bytes());
        hasher.update(&self.consumed);
        hasher.finalize().into()
    }

    fn is_blocked(&self, new_messages: bool) -> Option<BlockReason> {
        if self.step_limit.is_some_and(|limit| self.position >= limit) {
            return Some(BlockReason::Halted);
        }
        if self.waits_for_inbox && !new_messages {
            return Some(BlockReason::Inbox {
                inbox: self.consumed,
            });
        }
        None
    }

    fn execute_assertion(
        &mut self,
        max_steps: u64,
        _time_bounds: &TimeBounds,
        inbox: &MessageSegment,
        max_wall_time: Duration,
    ) -> (ExecutionAssertion, u64) {
        let (assertion, steps_run) = self.run(max_steps, inbox);
        self.log.push(ExecutionRecord {
            max_steps,
            max_wall_time,
            messages: inbox.len(),
            steps_run,
        });
        (assertion, steps_run)
    }
}

// ============================================================================
// Graph
// ============================================================================

/// Assertion graph held in a map.
///
/// A node is a leaf while none of its successor slots is filled.
#[derive(Debug)]
pub struct InMemoryGraph {
    nodes: HashMap<Hash, GraphNode>,
    root: Hash,
    params: ChainParams,
}

impl InMemoryGraph {
    /// Creates a graph whose root holds `machine` at the inbox's current top.
    #[must_use]
    pub fn with_root(machine: impl Machine + 'static, inbox: &dyn Inbox) -> Self {
        let proto = VmProtoData {
            machine_hash: machine.hash(),
            inbox_top: inbox.top_hash(),
            inbox_count: inbox.top_count(),
        };
        let root_hash = hash_bytes(b"graph-root");
        let root = GraphNode::root(root_hash, proto, Box::new(machine));
        let mut nodes = HashMap::new();
        nodes.insert(root_hash, root);
        Self {
            nodes,
            root: root_hash,
            params: ChainParams::default(),
        }
    }

    /// Overrides the chain parameters.
    #[must_use]
    pub const fn with_params(mut self, params: ChainParams) -> Self {
        self.params = params;
        self
    }

    /// Root node hash.
    #[must_use]
    pub const fn root_hash(&self) -> Hash {
        self.root
    }

    /// Commits a child of `parent` in slot `kind` proposed by `disputable`.
    ///
    /// A valid child takes its inbox position and machine hash from the
    /// claim; an invalid child keeps the parent's.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is not in the graph.
    pub fn add_child(
        &mut self,
        parent: &Hash,
        kind: ChildType,
        disputable: DisputableAssertion,
    ) -> Hash {
        let parent_node = self.nodes.get(parent).expect("parent must exist");
        let proto = if kind == ChildType::Valid {
            VmProtoData {
                machine_hash: disputable.claim.assertion_stub.after_hash,
                inbox_top: disputable.claim.after_inbox_top,
                inbox_count: parent_node.vm_proto_data().inbox_count
                    + disputable.params.imported_message_count,
            }
        } else {
            *parent_node.vm_proto_data()
        };
        let depth = parent_node.depth() + 1;

        let mut hasher = blake3::Hasher::new();
        hasher.update(parent);
        hasher.update(&[u8::try_from(kind.slot()).unwrap_or(u8::MAX)]);
        hasher.update(&disputable.claim.assertion_stub.after_hash);
        hasher.update(&disputable.params.num_steps.to_le_bytes());
        let hash: Hash = hasher.finalize().into();

        let child = GraphNode::new(hash, *parent, depth, proto, Some(disputable));
        self.nodes.insert(hash, child);
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.set_successor(kind, hash);
        }
        hash
    }

    /// Inserts a node as is, without linking it to a parent.
    pub fn insert_node(&mut self, node: GraphNode) {
        self.nodes.insert(node.hash(), node);
    }

    /// Points `parent`'s successor slot `kind` at `child`, which need not
    /// exist.
    pub fn set_successor(&mut self, parent: &Hash, kind: ChildType, child: Hash) {
        if let Some(node) = self.nodes.get_mut(parent) {
            node.set_successor(kind, child);
        }
    }

    /// Commits children of `parent` in every slot of `kinds`.
    pub fn add_children(
        &mut self,
        parent: &Hash,
        kinds: &[ChildType],
        disputable: DisputableAssertion,
    ) -> Vec<Hash> {
        kinds
            .iter()
            .map(|kind| self.add_child(parent, *kind, disputable))
            .collect()
    }
}

impl AssertionGraph for InMemoryGraph {
    fn node(&self, hash: &Hash) -> Option<&GraphNode> {
        self.nodes.get(hash)
    }

    fn node_mut(&mut self, hash: &Hash) -> Option<&mut GraphNode> {
        self.nodes.get_mut(hash)
    }

    fn is_leaf(&self, node: &GraphNode) -> bool {
        self.nodes.contains_key(&node.hash()) && node.first_successor().is_none()
    }

    fn params(&self) -> ChainParams {
        self.params
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Clock returning a settable time.
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicU64,
}

impl FixedClock {
    /// Creates a clock fixed at `now_secs`.
    #[must_use]
    pub const fn new(now_secs: u64) -> Self {
        Self {
            now: AtomicU64::new(now_secs),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now_secs: u64) {
        self.now.store(now_secs, Ordering::SeqCst);
    }

    /// Moves the current time forward.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
