//! Dispatch Path Benchmarks
//!
//! - Mailbox enqueue + inline consume with no system involved
//! - Async send through the dispatcher and a worker slot (orderly round trip)
//! - Predatory call on an idle actor

use actor_runtime::{
    Actor, ActorBehavior, ActorCell, ActorContext, ActorId, ActorSystem, ActorSystemConfig,
    ExecutionGuard, HandlerResult, Handles, WorkerKind,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

#[derive(Default)]
struct Tally {
    total: u64,
}

impl ActorBehavior for Tally {}

impl Handles<u64> for Tally {
    fn handle(&mut self, _ctx: &ActorContext, message: &u64) -> HandlerResult {
        self.total = self.total.wrapping_add(*message);
        Ok(())
    }
}

fn bench_config(kind: WorkerKind) -> ActorSystemConfig {
    ActorSystemConfig::new("bench")
        .with_worker_count(2)
        .with_worker_kind(kind)
        .with_idle_sleep(Duration::from_millis(5))
        .with_shutdown_poll_interval(Duration::from_millis(5))
        .with_predatory_backoff(Duration::from_millis(1))
}

fn bench_mailbox_inline(c: &mut Criterion) {
    let actor = Actor::with_capacity("inline", 0, Tally::default());
    actor.route::<u64>();
    let sender = ActorId::from("bench");

    c.bench_function("mailbox_enqueue_consume", |b| {
        b.iter(|| {
            actor.enqueue(sender.clone(), Box::new(black_box(1_u64)));
            let _guard = ExecutionGuard::try_acquire(&*actor);
            black_box(actor.consume_one());
        });
    });
}

fn bench_orderly_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("orderly_round_trip");

    for kind in [WorkerKind::Thread, WorkerKind::Task] {
        let system = ActorSystem::new(bench_config(kind)).expect("system");
        system.start().expect("start");
        let actor = system.create_actor("target", Tally::default()).expect("actor");
        actor.route::<u64>();

        group.bench_with_input(BenchmarkId::from_parameter(format!("{:?}", kind)), &kind, |b, _| {
            b.iter(|| black_box(system.send_sync_orderly("bench", "target", 1_u64)));
        });

        system.shutdown();
    }

    group.finish();
}

fn bench_predatory_idle(c: &mut Criterion) {
    let system = ActorSystem::new(bench_config(WorkerKind::Thread)).expect("system");
    system.start().expect("start");
    let actor = system.create_actor("target", Tally::default()).expect("actor");
    actor.route::<u64>();

    c.bench_function("predatory_idle_target", |b| {
        b.iter(|| black_box(system.send_sync_predatory("bench", "target", 1_u64)));
    });

    system.shutdown();
}

criterion_group!(
    benches,
    bench_mailbox_inline,
    bench_orderly_round_trip,
    bench_predatory_idle
);
criterion_main!(benches);
