//! Preparation and verification agree with each other.

use std::time::Duration;

use observer_core::classifier::{classify, Verdict, VerificationInput};
use observer_core::config::ObserverConfig;
use observer_core::graph::AssertionGraph;
use observer_core::hash::Hash;
use observer_core::inbox::MessageSegment;
use observer_core::machine::Machine;
use observer_core::preparer::PreparationInput;
use observer_core::protocol::{
    AssertionClaim, AssertionParams, ChildType, ExecutionAssertionStub, TimeBounds,
};
use observer_core::testing::{InMemoryGraph, InMemoryInbox, ScriptedMachine};
use proptest::prelude::*;

fn bounds() -> TimeBounds {
    TimeBounds {
        lower_block: 40,
        upper_block: 60,
        lower_timestamp: 0,
        upper_timestamp: 10_000,
    }
}

#[test]
fn prepared_assertion_verifies_as_valid() {
    let inbox = InMemoryInbox::with_messages(5);
    let machine = ScriptedMachine::new(17).with_step_limit(400);
    let log = machine.execution_log();
    let mut graph = InMemoryGraph::with_root(machine, &inbox);
    inbox.push(b"withdrawal".to_vec());
    let root = graph.root_hash();
    let frontier = graph.node(&root).unwrap().clone();

    let prepared =
        PreparationInput::gather(&graph, &inbox, &frontier, bounds(), &ObserverConfig::default())
            .unwrap()
            .execute();
    assert_eq!(prepared.params.num_steps, 400);

    let child = graph.add_child(&root, ChildType::Valid, prepared.disputable());
    let disputable = *graph.node(&child).unwrap().disputable().unwrap();
    let verdict = VerificationInput::gather(&inbox, &frontier, &disputable)
        .unwrap()
        .classify();

    match verdict {
        Verdict::Valid { assertion, machine } => {
            assert_eq!(assertion, prepared.assertion);
            assert_eq!(machine.hash(), prepared.machine.hash());
            let committed = graph.node(&child).unwrap().vm_proto_data().machine_hash;
            assert_eq!(machine.hash(), committed);
        },
        other => panic!("expected valid verdict, got {other:?}"),
    }
    assert_eq!(log.len(), 2);
}

#[test]
fn prepared_assertion_on_stale_inbox_is_rejected() {
    let inbox = InMemoryInbox::with_messages(1);
    let graph = InMemoryGraph::with_root(ScriptedMachine::new(2), &inbox);
    inbox.push(b"first".to_vec());
    let frontier = graph.node(&graph.root_hash()).unwrap().clone();
    let prepared =
        PreparationInput::gather(&graph, &inbox, &frontier, bounds(), &ObserverConfig::default())
            .unwrap()
            .execute();

    // The claim imported one message; a verifier that only sees the earlier
    // inbox cannot resolve the claimed top.
    let stale = InMemoryInbox::with_messages(1);
    let verdict = VerificationInput::gather(&stale, &frontier, &prepared.disputable())
        .unwrap()
        .classify();
    assert!(matches!(verdict, Verdict::InvalidInboxTop));
}

fn arb_hash() -> impl Strategy<Value = Hash> {
    prop::array::uniform32(any::<u8>())
}

fn arb_claim() -> impl Strategy<Value = AssertionClaim> {
    (arb_hash(), arb_hash(), arb_hash(), any::<bool>(), any::<u64>()).prop_map(
        |(after_inbox_top, imported_messages_slice, after_hash, did_inbox_insn, num_gas)| {
            AssertionClaim {
                after_inbox_top,
                imported_messages_slice,
                assertion_stub: ExecutionAssertionStub {
                    after_hash,
                    did_inbox_insn,
                    num_gas,
                    ..ExecutionAssertionStub::default()
                },
            }
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: classification is a function of its inputs.
    #[test]
    fn prop_classify_is_deterministic(
        claim in arb_claim(),
        num_steps in 0u64..200,
        seed in any::<u64>(),
        messages in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..16), 0..4),
        top_matches in any::<bool>(),
        slice_matches in any::<bool>(),
    ) {
        let machine = ScriptedMachine::new(seed);
        let segment = MessageSegment::new(messages);
        let params = AssertionParams {
            num_steps,
            time_bounds: bounds(),
            imported_message_count: segment.len() as u64,
        };
        let after_top = if top_matches { claim.after_inbox_top } else { [0; 32] };
        let slice = if slice_matches { claim.imported_messages_slice } else { segment.hash() };

        let first = classify(&params, &claim, Some(&after_top), &slice, &segment, &machine);
        let second = classify(&params, &claim, Some(&after_top), &slice, &segment, &machine);
        prop_assert_eq!(first.child_type(), second.child_type());
        if let (Verdict::Valid { assertion: a, .. }, Verdict::Valid { assertion: b, .. }) =
            (&first, &second)
        {
            prop_assert_eq!(a, b);
        }
        prop_assert_eq!(machine.hash(), ScriptedMachine::new(seed).hash());
    }

    /// Property: an honest claim always verifies, whatever the inbox holds.
    #[test]
    fn prop_honest_claim_is_valid(
        num_steps in 0u64..200,
        seed in any::<u64>(),
        messages in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..16), 0..4),
    ) {
        let machine = ScriptedMachine::new(seed);
        let segment = MessageSegment::new(messages);
        let params = AssertionParams {
            num_steps,
            time_bounds: bounds(),
            imported_message_count: segment.len() as u64,
        };
        let top = [5; 32];
        let claim = AssertionClaim {
            after_inbox_top: top,
            imported_messages_slice: segment.hash(),
            assertion_stub: machine.expected_assertion(num_steps, &segment).stub(),
        };

        let verdict = classify(&params, &claim, Some(&top), &segment.hash(), &segment, &machine);
        prop_assert!(verdict.is_valid());
    }
}

#[test]
fn wall_time_is_uncapped_during_verification() {
    let machine = ScriptedMachine::new(8);
    let log = machine.execution_log();
    let segment = MessageSegment::empty();
    let claim = AssertionClaim {
        after_inbox_top: [1; 32],
        imported_messages_slice: segment.hash(),
        assertion_stub: machine.expected_assertion(3, &segment).stub(),
    };
    let params = AssertionParams {
        num_steps: 3,
        time_bounds: bounds(),
        imported_message_count: 0,
    };

    let verdict = classify(&params, &claim, Some(&[1; 32]), &segment.hash(), &segment, &machine);
    assert!(verdict.is_valid());
    assert_eq!(log.records()[0].max_wall_time, Duration::ZERO);
}
