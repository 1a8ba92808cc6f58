mod common;

use std::collections::{BTreeMap, BTreeSet};

use codec::{Event, Registry};
use common::Chat;
use proptest::prelude::*;
use room::EventChannel;

proptest! {
    #[test]
    fn lossy_link_dispatches_each_delivered_event_once(
        count in 1u32..48,
        attempts in 1u8..5,
        width in 4usize..40,
        lost in prop::collection::vec(any::<bool>(), 24),
        acks_lost in prop::collection::vec(any::<bool>(), 24),
    ) {
        let mut registry = Registry::new();
        let index = registry.register_event::<Chat>();
        let mut sender = EventChannel::new(width);
        let mut receiver = EventChannel::new(width);
        for code in 0..count {
            sender.enqueue(Event::new(index, Box::new(Chat { code }), None), attempts);
        }

        let mut sent: BTreeMap<u16, u8> = BTreeMap::new();
        let mut delivered = BTreeSet::new();
        let mut dispatched = Vec::new();
        for (lost, ack_lost) in lost.iter().zip(&acks_lost) {
            let picked = sender.select(|_| true);
            let events: Vec<Event> = picked
                .iter()
                .filter_map(|&i| sender.get(i).cloned())
                .collect();
            sender.mark_sent(&picked);

            for event in &events {
                let id = event.sequence().raw();
                *sent.entry(id).or_default() += 1;
                if !lost {
                    delivered.insert(id);
                    if receiver.receive(event) {
                        dispatched.push(id);
                    }
                }
            }
            if !ack_lost {
                sender.acknowledge(receiver.latest_received());
            }
        }

        prop_assert!(sent.values().all(|&n| n <= attempts));
        let unique: BTreeSet<u16> = dispatched.iter().copied().collect();
        prop_assert_eq!(unique.len(), dispatched.len());
        prop_assert_eq!(unique, delivered);
    }
}
