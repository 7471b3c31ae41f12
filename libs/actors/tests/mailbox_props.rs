//! Property tests for mailbox capacity and ordering

use actor_runtime::{Actor, ActorBehavior, ActorCell, ActorContext, ActorId, ExecutionGuard};
use proptest::prelude::*;

#[derive(Default)]
struct Sink {
    seen: Vec<u32>,
}

impl ActorBehavior for Sink {}

fn sink(capacity: usize) -> std::sync::Arc<Actor<Sink>> {
    let actor = Actor::with_capacity("sink", capacity, Sink::default());
    actor.register_online_handler(|state: &mut Sink, _: &ActorContext, n: &u32| {
        state.seen.push(*n);
        Ok(())
    });
    actor
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_bounded_mailbox_accepts_exactly_capacity(capacity in 1usize..64, extra in 1usize..16) {
        let actor = sink(capacity);
        let sender = ActorId::from("feeder");

        for n in 0..capacity {
            prop_assert!(actor.enqueue(sender.clone(), Box::new(n as u32)));
        }
        for n in 0..extra {
            prop_assert!(!actor.enqueue(sender.clone(), Box::new((capacity + n) as u32)));
        }
        prop_assert_eq!(actor.mailbox_len(), capacity);
    }

    #[test]
    fn prop_consumption_preserves_arrival_order(values in proptest::collection::vec(any::<u32>(), 1..64)) {
        let actor = sink(0);
        let sender = ActorId::from("feeder");
        for value in &values {
            prop_assert!(actor.enqueue(sender.clone(), Box::new(*value)));
        }

        for _ in 0..values.len() {
            let guard = ExecutionGuard::try_acquire(&*actor);
            prop_assert!(guard.is_some());
            prop_assert!(actor.consume_one());
        }

        let seen = actor.inspect(|state| state.seen.clone());
        prop_assert_eq!(seen, values);
    }
}
