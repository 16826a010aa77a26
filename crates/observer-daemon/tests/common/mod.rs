//! Shared fixtures for opinion loop integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use observer_core::graph::{AssertionGraph, GraphNode};
use observer_core::hash::{hash_bytes, Hash};
use observer_core::inbox::{Inbox, MessageSegment};
use observer_core::machine::Machine;
use observer_core::preparer::PreparedAssertion;
use observer_core::protocol::{
    AssertionClaim, AssertionParams, BlockId, ChainParams, DisputableAssertion, TimeBounds,
    VmProtoData,
};
use observer_core::testing::{InMemoryGraph, InMemoryInbox, ScriptedMachine};
use observer_daemon::ChainListener;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// One `frontier_advanced` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
    pub node: Hash,
    pub depth: u64,
}

/// One `assertion_prepared` call.
#[derive(Debug, Clone)]
pub struct Published {
    pub disputable: DisputableAssertion,
    pub prev: Hash,
    pub known_valid: Hash,
    pub latest_block: BlockId,
}

/// Listener that records every call.
#[derive(Debug, Default)]
pub struct RecordingListener {
    advances: Mutex<Vec<Advance>>,
    published: Mutex<Vec<Published>>,
}

impl RecordingListener {
    pub fn advances(&self) -> Vec<Advance> {
        self.advances.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }
}

impl ChainListener for RecordingListener {
    fn frontier_advanced(&self, graph: &dyn AssertionGraph, node: &GraphNode) {
        assert!(graph.node(&node.hash()).is_some());
        self.advances.lock().unwrap().push(Advance {
            node: node.hash(),
            depth: node.depth(),
        });
    }

    fn assertion_prepared(
        &self,
        _params: &ChainParams,
        _graph: &dyn AssertionGraph,
        known_valid: &GraphNode,
        latest_block: &BlockId,
        prepared: &PreparedAssertion,
    ) {
        self.published.lock().unwrap().push(Published {
            disputable: prepared.disputable(),
            prev: prepared.prev,
            known_valid: known_valid.hash(),
            latest_block: *latest_block,
        });
    }
}

/// Graph whose verified frontier sits at `depth` holding `machine` at the
/// inbox's current position.
pub fn graph_with_frontier(
    inbox: &InMemoryInbox,
    machine: ScriptedMachine,
    depth: u64,
) -> (InMemoryGraph, Hash) {
    let mut graph = InMemoryGraph::with_root(ScriptedMachine::new(0), inbox);
    let proto = VmProtoData {
        machine_hash: machine.hash(),
        inbox_top: inbox.top_hash(),
        inbox_count: inbox.top_count(),
    };
    let hash = hash_bytes(&depth.to_le_bytes());
    let mut node = GraphNode::new(hash, graph.root_hash(), depth, proto, None);
    assert!(node.update_valid_opinion(Box::new(machine), Default::default()));
    graph.insert_node(node);
    (graph, hash)
}

/// The assertion an honest validator would propose on top of `frontier`
/// after `steps` steps, importing every message the inbox gained since.
pub fn honest_assertion(
    inbox: &InMemoryInbox,
    frontier: &GraphNode,
    steps: u64,
) -> DisputableAssertion {
    let proto = frontier.vm_proto_data();
    let imported = inbox.top_count() - proto.inbox_count;
    let segment = inbox.generate_segment(&proto.inbox_top, imported).unwrap();
    let time_bounds = TimeBounds {
        lower_block: 0,
        upper_block: 100,
        lower_timestamp: 0,
        upper_timestamp: u64::MAX,
    };
    let mut machine = frontier.machine().unwrap().clone_machine();
    let (assertion, steps_run) =
        machine.execute_assertion(steps, &time_bounds, &segment, Duration::ZERO);
    assert_eq!(steps_run, steps);

    DisputableAssertion {
        params: AssertionParams {
            num_steps: steps,
            time_bounds,
            imported_message_count: imported,
        },
        claim: AssertionClaim {
            after_inbox_top: if imported == 0 {
                proto.inbox_top
            } else {
                inbox.top_hash()
            },
            imported_messages_slice: if imported == 0 {
                MessageSegment::empty_hash()
            } else {
                segment.hash()
            },
            assertion_stub: assertion.stub(),
        },
    }
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Shared handle to a recording listener.
pub fn recording_listener() -> Arc<RecordingListener> {
    Arc::new(RecordingListener::default())
}
