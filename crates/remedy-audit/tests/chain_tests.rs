//! Audit chain properties
//!
//! - Any sequence of appends verifies.
//! - Mutating any field of any stored entry fails verification at that index.
//! - Concurrent appenders still produce one valid, gap-free chain.

use proptest::prelude::*;
use remedy_audit::{verify_entries, AuditChain, AuditEvent};
use std::sync::Arc;
use std::thread;

fn arb_event() -> impl Strategy<Value = AuditEvent> {
    (
        "[a-z]{1,12}",
        "inc-[0-9]{1,3}",
        prop_oneof![Just("transition"), Just("dispatch"), Just("approval")],
        ".{0,40}",
    )
        .prop_map(|(actor, resource, action, result)| AuditEvent::new(actor, resource, action, result))
}

proptest! {
    #[test]
    fn prop_appends_always_verify(events in prop::collection::vec(arb_event(), 0..40)) {
        let chain = AuditChain::new();
        for event in events.iter().cloned() {
            chain.append(event).unwrap();
        }
        let report = chain.verify();
        prop_assert!(report.valid);
        prop_assert_eq!(report.entries_checked, events.len());
        prop_assert_eq!(report.broken_at, None);
    }

    #[test]
    fn prop_mutation_breaks_at_index(
        events in prop::collection::vec(arb_event(), 1..25),
        pick in any::<prop::sample::Index>(),
        field in 0usize..5,
    ) {
        let chain = AuditChain::new();
        for event in events {
            chain.append(event).unwrap();
        }

        let mut entries = chain.entries();
        let index = pick.index(entries.len());
        let entry = &mut entries[index];
        match field {
            0 => entry.actor.push('!'),
            1 => entry.resource.push('!'),
            2 => entry.action.push('!'),
            3 => entry.result.push('!'),
            _ => entry.timestamp += chrono::Duration::seconds(1),
        }

        let report = verify_entries(&entries);
        prop_assert!(!report.valid);
        prop_assert_eq!(report.broken_at, Some(index));
    }
}

#[test]
fn removing_an_entry_breaks_the_chain() {
    let chain = AuditChain::new();
    for n in 0..4 {
        chain
            .append(AuditEvent::new("orchestrator", "inc-1", "transition", format!("step {n}")))
            .unwrap();
    }
    let mut entries = chain.entries();
    entries.remove(1);
    assert_eq!(verify_entries(&entries).broken_at, Some(1));
}

#[test]
fn concurrent_appends_form_single_valid_chain() {
    let chain = Arc::new(AuditChain::new());
    let mut handles = Vec::new();

    for worker in 0..8 {
        let chain = Arc::clone(&chain);
        handles.push(thread::spawn(move || {
            for step in 0..50 {
                chain
                    .append(AuditEvent::new(
                        "orchestrator",
                        format!("inc-{worker}"),
                        "transition",
                        format!("{step}"),
                    ))
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let entries = chain.entries();
    assert_eq!(entries.len(), 400);
    assert!(chain.verify().valid);

    // Sequence numbers are dense and each worker's own steps stay ordered
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.sequence, i as u64);
    }
    for worker in 0..8 {
        let steps: Vec<u32> = chain
            .entries_for(&format!("inc-{worker}"))
            .iter()
            .map(|e| e.result.parse().unwrap())
            .collect();
        assert_eq!(steps, (0..50).collect::<Vec<_>>());
    }
}
