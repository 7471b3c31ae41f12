//! Actor System Core
//!
//! Owns the id → actor registry, the per-actor pending-message counts, the
//! single dispatcher thread and the worker center, and implements every
//! routing entry point:
//!
//! - **async**: enqueue into the target's mailbox and wake the dispatcher;
//!   an unregistered target turns into an offline delivery handled by the
//!   sender's own offline handler
//! - **predatory sync**: the caller wins the target's Executing flag and runs
//!   the handler inline, bypassing the mailbox
//! - **orderly sync**: the message is enqueued like any other and the caller
//!   blocks until whichever worker processes it fires the completion latch
//!
//! # Lock Ordering
//!
//! Registry and pending-count operations never hold a map shard while
//! calling into an actor. Handlers run with only their own actor's behaviour
//! lock held.

use crate::actor::{Actor, ActorBehavior, ActorCell};
use crate::config::ActorSystemConfig;
use crate::dispatcher::{self, DispatchSignal};
use crate::messages::{Payload, SyncEnvelope, SyncOutcome};
use crate::registry::{ActorId, ActorRegistry, PendingCounts};
use crate::state::ExecutionPermit;
use crate::worker::WorkerCenter;
use crate::{ActorError, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How an async send was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written into the target's mailbox
    Enqueued,
    /// Target unregistered; handed to the sender's offline handler
    Offline,
}

/// System-wide counters
#[derive(Debug, Default)]
pub struct SystemMetrics {
    pub messages_enqueued: AtomicU64,
    pub offline_deliveries: AtomicU64,
    pub delivery_failures: AtomicU64,
    pub dispatch_grants: AtomicU64,
    pub empty_dispatches: AtomicU64,
    pub handler_faults: AtomicU64,
    pub predatory_calls: AtomicU64,
    pub orderly_calls: AtomicU64,
}

impl SystemMetrics {
    pub fn record_enqueued(&self) {
        self.messages_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_offline(&self) {
        self.offline_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_grant(&self) {
        self.dispatch_grants.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_dispatch(&self) {
        self.empty_dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_fault(&self) {
        self.handler_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_predatory_call(&self) {
        self.predatory_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_orderly_call(&self) {
        self.orderly_calls.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of a system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemStats {
    pub name: String,
    pub actors: usize,
    pub pending_actors: usize,
    pub pending_messages: usize,
    pub messages_enqueued: u64,
    pub offline_deliveries: u64,
    pub delivery_failures: u64,
    pub dispatch_grants: u64,
    pub empty_dispatches: u64,
    pub handler_faults: u64,
    pub predatory_calls: u64,
    pub orderly_calls: u64,
    pub shutdown: bool,
}

/// State shared by every handle, the dispatcher and the actors' back-references
pub(crate) struct SystemShared {
    pub(crate) name: String,
    pub(crate) config: ActorSystemConfig,
    pub(crate) registry: ActorRegistry,
    pub(crate) pending: PendingCounts,
    pub(crate) workers: Arc<WorkerCenter>,
    pub(crate) signal: DispatchSignal,
    pub(crate) metrics: SystemMetrics,
    shutting_down: AtomicBool,
    started: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl SystemShared {
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

/// Cloneable handle to an actor system
#[derive(Clone)]
pub struct ActorSystem {
    shared: Arc<SystemShared>,
}

/// Non-owning handle held by actors and the dispatcher
#[derive(Clone)]
pub struct WeakActorSystem {
    shared: Weak<SystemShared>,
}

impl WeakActorSystem {
    pub fn upgrade(&self) -> Option<ActorSystem> {
        self.shared.upgrade().map(|shared| ActorSystem { shared })
    }
}

impl fmt::Debug for WeakActorSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakActorSystem")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

/// A message for an unregistered target, waiting to run the sender's offline handler
///
/// Runs on the target id's slot and only with the sender's Executing flag
/// held. While the sender is busy the delivery goes to the back of the slot
/// queue instead of parking the slot, so tasks queued behind it (which the
/// busy sender may be waiting on) still run.
struct OfflineDelivery {
    sender: Arc<dyn ActorCell>,
    target: ActorId,
    payload: Payload,
    workers: Arc<WorkerCenter>,
    backoff: Duration,
}

impl OfflineDelivery {
    fn submit(self) -> Result<()> {
        let workers = Arc::clone(&self.workers);
        let key = self.target.clone();
        workers.submit(key.as_str(), Box::new(move || self.attempt()))
    }

    fn attempt(self) {
        if let Some(permit) = ExecutionPermit::try_acquire(&self.sender) {
            permit.cell().handle_offline(&self.target, self.payload);
            return;
        }

        thread::sleep(self.backoff);
        let from = self.sender.id().clone();
        let to = self.target.clone();
        if let Err(err) = self.submit() {
            // slots are closing; the message goes nowhere
            warn!(from = %from, to = %to, error = %err, "Offline delivery dropped while sender busy");
        }
    }
}

/// Box a message, passing an already-erased payload through untouched
fn into_payload<M: Any + Send>(message: M) -> Payload {
    let boxed: Payload = Box::new(message);
    match boxed.downcast::<Payload>() {
        Ok(inner) => *inner,
        Err(boxed) => boxed,
    }
}

impl ActorSystem {
    /// Build a system and its worker center. Call [`start`](Self::start)
    /// before sending.
    pub fn new(config: ActorSystemConfig) -> Result<Self> {
        config.validate()?;
        let workers = WorkerCenter::with_kind(
            format!("{}-worker", config.name),
            config.worker_count,
            config.worker_kind,
        )?;
        Ok(Self::build(config, Arc::new(workers)))
    }

    /// Build a system on an injected worker center
    pub fn with_worker_center(config: ActorSystemConfig, workers: Arc<WorkerCenter>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, workers))
    }

    /// Default configuration under `name`, built and started
    pub fn launch(name: impl Into<String>) -> Result<Self> {
        let system = Self::new(ActorSystemConfig::new(name))?;
        system.start()?;
        Ok(system)
    }

    fn build(config: ActorSystemConfig, workers: Arc<WorkerCenter>) -> Self {
        info!(
            system = %config.name,
            worker_count = workers.worker_count(),
            worker_kind = ?config.worker_kind,
            "Creating actor system"
        );

        Self {
            shared: Arc::new(SystemShared {
                name: config.name.clone(),
                config,
                registry: ActorRegistry::new(),
                pending: PendingCounts::new(),
                workers,
                signal: DispatchSignal::new(),
                metrics: SystemMetrics::default(),
                shutting_down: AtomicBool::new(false),
                started: AtomicBool::new(false),
                dispatcher: Mutex::new(None),
            }),
        }
    }

    /// Spawn the dispatcher thread; later calls are no-ops
    pub fn start(&self) -> Result<()> {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let weak = self.downgrade();
        let handle = thread::Builder::new()
            .name(format!("{}-dispatcher", self.shared.name))
            .spawn(move || dispatcher::run(weak))
            .map_err(|err| {
                self.shared.started.store(false, Ordering::Release);
                ActorError::DispatcherSpawn(err)
            })?;
        *self.shared.dispatcher.lock() = Some(handle);

        info!(system = %self.shared.name, "Actor system started");
        Ok(())
    }

    pub fn downgrade(&self) -> WeakActorSystem {
        WeakActorSystem {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub(crate) fn shared(&self) -> &SystemShared {
        &self.shared
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &ActorSystemConfig {
        &self.shared.config
    }

    pub fn metrics(&self) -> &SystemMetrics {
        &self.shared.metrics
    }

    pub fn workers(&self) -> &Arc<WorkerCenter> {
        &self.shared.workers
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutting_down()
    }

    /// Wake a parked dispatcher
    pub fn notify_dispatcher(&self) {
        self.shared.signal.notify();
    }

    /// Register an actor and bind it to this system
    ///
    /// A second actor under an id already present replaces the first. The
    /// replaced actor is not notified and keeps whatever its mailbox holds.
    pub fn add_actor(&self, actor: Arc<dyn ActorCell>) -> Result<()> {
        if actor.id().is_blank() {
            return Err(ActorError::BlankActorId);
        }
        if self.is_shutdown() {
            return Err(ActorError::SystemShutdown {
                system: self.shared.name.clone(),
            });
        }

        actor.bind_system(self.downgrade());
        let id = actor.id().clone();
        if self.shared.registry.insert(actor).is_some() {
            warn!(system = %self.shared.name, actor_id = %id, "Actor id re-registered, previous actor replaced");
        } else {
            debug!(system = %self.shared.name, actor_id = %id, "Actor registered");
        }
        Ok(())
    }

    /// Build an actor with the configured default mailbox capacity and register it
    pub fn create_actor<B: ActorBehavior>(
        &self,
        id: impl Into<ActorId>,
        behavior: B,
    ) -> Result<Arc<Actor<B>>> {
        let actor = Actor::with_capacity(id, self.shared.config.default_mailbox_capacity, behavior);
        self.add_actor(Arc::clone(&actor) as Arc<dyn ActorCell>)?;
        Ok(actor)
    }

    pub fn actor(&self, id: &str) -> Option<Arc<dyn ActorCell>> {
        self.shared.registry.get(id)
    }

    pub fn actor_ids(&self) -> Vec<ActorId> {
        self.shared.registry.ids()
    }

    /// Messages enqueued for `id` and not yet granted to a worker
    pub fn pending_count(&self, id: &str) -> usize {
        self.shared.pending.get(id)
    }

    pub fn stats(&self) -> SystemStats {
        let metrics = &self.shared.metrics;
        SystemStats {
            name: self.shared.name.clone(),
            actors: self.shared.registry.len(),
            pending_actors: self.shared.pending.len(),
            pending_messages: self.shared.pending.total(),
            messages_enqueued: metrics.messages_enqueued.load(Ordering::Relaxed),
            offline_deliveries: metrics.offline_deliveries.load(Ordering::Relaxed),
            delivery_failures: metrics.delivery_failures.load(Ordering::Relaxed),
            dispatch_grants: metrics.dispatch_grants.load(Ordering::Relaxed),
            empty_dispatches: metrics.empty_dispatches.load(Ordering::Relaxed),
            handler_faults: metrics.handler_faults.load(Ordering::Relaxed),
            predatory_calls: metrics.predatory_calls.load(Ordering::Relaxed),
            orderly_calls: metrics.orderly_calls.load(Ordering::Relaxed),
            shutdown: self.is_shutdown(),
        }
    }

    fn shutdown_error(&self) -> ActorError {
        ActorError::SystemShutdown {
            system: self.shared.name.clone(),
        }
    }

    /// Async send, returning how the message was delivered
    pub fn try_send_async(&self, from: &ActorId, to: &ActorId, payload: Payload) -> Result<Delivery> {
        let shared = &self.shared;
        if shared.is_shutting_down() {
            warn!(system = %shared.name, from = %from, to = %to, "Send rejected, actor system is shutting down");
            shared.metrics.record_delivery_failure();
            return Err(self.shutdown_error());
        }

        let Some(target) = shared.registry.get(to.as_str()) else {
            self.route_offline(from, to, payload);
            shared.metrics.record_offline();
            return Ok(Delivery::Offline);
        };

        if !target.enqueue(from.clone(), payload) {
            warn!(
                system = %shared.name,
                from = %from,
                to = %to,
                capacity = target.mailbox_capacity(),
                "Mailbox full, message rejected"
            );
            shared.metrics.record_delivery_failure();
            return Err(ActorError::MailboxFull {
                actor: to.to_string(),
                capacity: target.mailbox_capacity(),
            });
        }

        shared.pending.increment(to);
        shared.metrics.record_enqueued();
        shared.signal.notify();
        Ok(Delivery::Enqueued)
    }

    /// Hand a message for an unregistered target to the sender's offline handler
    fn route_offline(&self, from: &ActorId, to: &ActorId, payload: Payload) {
        let Some(sender) = self.shared.registry.get(from.as_str()) else {
            warn!(
                system = %self.shared.name,
                from = %from,
                to = %to,
                "Target and sender both unregistered, offline message dropped"
            );
            return;
        };

        debug!(system = %self.shared.name, from = %from, to = %to, "Target not registered, routing offline");
        let delivery = OfflineDelivery {
            sender,
            target: to.clone(),
            payload,
            workers: Arc::clone(&self.shared.workers),
            backoff: self.shared.config.busy_backoff(),
        };
        if let Err(err) = delivery.submit() {
            error!(from = %from, to = %to, error = %err, "Failed to submit offline delivery");
        }
    }

    /// Async send; true when enqueued or routed offline
    pub fn send_async<M: Any + Send>(
        &self,
        from: impl Into<ActorId>,
        to: impl Into<ActorId>,
        message: M,
    ) -> bool {
        self.try_send_async(&from.into(), &to.into(), into_payload(message))
            .is_ok()
    }

    /// Predatory sync call
    ///
    /// Spins on the target's Executing flag, sleeping `predatory_backoff`
    /// between attempts, then runs the handler on the calling thread. Never
    /// call from a handler of `to` itself: it would spin forever.
    pub fn try_send_sync_predatory(&self, from: &ActorId, to: &ActorId, payload: Payload) -> Result<()> {
        let shared = &self.shared;
        if shared.is_shutting_down() {
            warn!(system = %shared.name, from = %from, to = %to, "Predatory call rejected, actor system is shutting down");
            shared.metrics.record_delivery_failure();
            return Err(self.shutdown_error());
        }

        let Some(target) = shared.registry.get(to.as_str()) else {
            warn!(system = %shared.name, from = %from, to = %to, "Predatory call to unregistered actor");
            shared.metrics.record_delivery_failure();
            return Err(ActorError::ActorNotFound { actor: to.to_string() });
        };

        shared.metrics.record_predatory_call();
        let started = Instant::now();
        let permit = loop {
            if let Some(permit) = ExecutionPermit::try_acquire(&target) {
                break permit;
            }
            thread::sleep(shared.config.predatory_backoff());
        };
        debug!(
            from = %from,
            to = %to,
            waited_ms = started.elapsed().as_millis() as u64,
            "Predatory call acquired target"
        );

        let result = permit.cell().process(from, payload);
        drop(permit);
        result
    }

    /// Predatory sync call; true when the handler completed without fault
    pub fn send_sync_predatory<M: Any + Send>(
        &self,
        from: impl Into<ActorId>,
        to: impl Into<ActorId>,
        message: M,
    ) -> bool {
        self.try_send_sync_predatory(&from.into(), &to.into(), into_payload(message))
            .is_ok()
    }

    /// Orderly sync call
    ///
    /// Enqueues behind whatever is already pending for `to` and blocks until
    /// the message has been processed. There is no timeout. Never call from a
    /// handler of `to` itself.
    pub fn try_send_sync_orderly(&self, from: &ActorId, to: &ActorId, payload: Payload) -> Result<SyncOutcome> {
        let shared = &self.shared;
        if payload.is::<SyncEnvelope>() {
            warn!(system = %shared.name, from = %from, to = %to, "Nested sync envelope rejected");
            shared.metrics.record_delivery_failure();
            return Err(ActorError::NestedSyncEnvelope);
        }
        if !shared.is_shutting_down() && !shared.registry.contains(to.as_str()) {
            warn!(system = %shared.name, from = %from, to = %to, "Orderly call to unregistered actor");
            shared.metrics.record_delivery_failure();
            return Err(ActorError::ActorNotFound { actor: to.to_string() });
        }

        let envelope = SyncEnvelope::new(from.clone(), payload);
        let latch = envelope.latch();
        shared.metrics.record_orderly_call();
        self.try_send_async(from, to, Box::new(envelope))?;

        let outcome = latch.wait();
        if outcome != SyncOutcome::Handled {
            warn!(from = %from, to = %to, outcome = ?outcome, "Orderly call did not complete cleanly");
        }
        Ok(outcome)
    }

    /// Orderly sync call; true only when the handler completed without fault
    pub fn send_sync_orderly<M: Any + Send>(
        &self,
        from: impl Into<ActorId>,
        to: impl Into<ActorId>,
        message: M,
    ) -> bool {
        matches!(
            self.try_send_sync_orderly(&from.into(), &to.into(), into_payload(message)),
            Ok(SyncOutcome::Handled)
        )
    }

    /// Stop the system
    ///
    /// Runs once; later calls return immediately. New sends are refused from
    /// the first call on. Waits (polling every `shutdown_poll_interval`, at
    /// most `max_shutdown_wait`) for pending messages to be dispatched, then
    /// clears the registry, runs every actor's shutdown hook, stops the
    /// dispatcher and shuts down the worker center.
    ///
    /// Blocks the caller. Do not call from inside a handler: the worker
    /// running that handler would wait on itself.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        if shared
            .shutting_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        info!(system = %shared.name, "Shutting down actor system");
        shared.signal.notify();

        let started = Instant::now();
        let max_wait = shared.config.max_shutdown_wait();
        if shared.started.load(Ordering::Acquire) {
            while !shared.pending.is_empty() {
                if started.elapsed() >= max_wait {
                    warn!(
                        system = %shared.name,
                        pending_actors = shared.pending.len(),
                        pending_messages = shared.pending.total(),
                        "Shutdown wait exceeded, abandoning pending messages"
                    );
                    break;
                }
                thread::sleep(shared.config.shutdown_poll_interval());
            }
        } else if !shared.pending.is_empty() {
            warn!(
                system = %shared.name,
                pending_messages = shared.pending.total(),
                "Actor system was never started, pending messages abandoned"
            );
        }

        let actors = shared.registry.drain();
        let actor_count = actors.len();
        for actor in actors {
            actor.shutdown();
        }

        shared.signal.notify();
        if let Some(handle) = shared.dispatcher.lock().take() {
            if handle.thread().id() == thread::current().id() {
                debug!(system = %shared.name, "Shutdown called from dispatcher thread, not joining");
            } else if handle.join().is_err() {
                error!(system = %shared.name, "Dispatcher thread terminated abnormally");
            }
        }

        shared.workers.shutdown();

        info!(
            system = %shared.name,
            actors = actor_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Actor system shutdown complete"
        );
    }
}

impl fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorSystem")
            .field("name", &self.shared.name)
            .field("actors", &self.shared.registry.len())
            .field("pending", &self.shared.pending.total())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorContext, HandlerResult, Handles};
    use crate::config::WorkerKind;

    #[derive(Default)]
    struct Counter {
        total: u64,
    }

    impl ActorBehavior for Counter {}

    impl Handles<u64> for Counter {
        fn handle(&mut self, _ctx: &ActorContext, message: &u64) -> HandlerResult {
            self.total += message;
            Ok(())
        }
    }

    fn test_config(name: &str) -> ActorSystemConfig {
        ActorSystemConfig::new(name)
            .with_worker_count(2)
            .with_worker_kind(WorkerKind::Thread)
            .with_shutdown_poll_interval(Duration::from_millis(10))
            .with_idle_sleep(Duration::from_millis(20))
            .with_predatory_backoff(Duration::from_millis(2))
    }

    #[test]
    fn test_into_payload_does_not_double_box() {
        let erased: Payload = Box::new(5_u64);
        let payload = into_payload(erased);
        assert_eq!(payload.downcast_ref::<u64>(), Some(&5));

        let plain = into_payload(String::from("x"));
        assert!(plain.is::<String>());
    }

    #[test]
    fn test_blank_actor_id_rejected() {
        let system = ActorSystem::new(test_config("blank")).unwrap();
        let err = system.create_actor("   ", Counter::default()).unwrap_err();
        assert!(matches!(err, ActorError::BlankActorId));
        system.shutdown();
    }

    #[test]
    fn test_unstarted_system_queues_but_does_not_dispatch() {
        let system = ActorSystem::new(test_config("unstarted")).unwrap();
        let counter = system.create_actor("c", Counter::default()).unwrap();
        counter.route::<u64>();

        assert!(system.send_async("x", "c", 3_u64));
        assert_eq!(system.pending_count("c"), 1);
        assert_eq!(counter.mailbox_len(), 1);

        system.shutdown();
        counter.inspect(|state| assert_eq!(state.total, 0));
    }

    #[test]
    fn test_stats_reflect_activity() {
        let system = ActorSystem::new(test_config("stats")).unwrap();
        system.start().unwrap();
        let counter = system.create_actor("c", Counter::default()).unwrap();
        counter.route::<u64>();

        assert!(system.send_sync_orderly("x", "c", 4_u64));
        assert!(system.send_async("c", "nowhere", 1_u64));

        let stats = system.stats();
        assert_eq!(stats.actors, 1);
        assert_eq!(stats.orderly_calls, 1);
        assert_eq!(stats.offline_deliveries, 1);
        assert!(stats.dispatch_grants >= 1);
        assert!(!stats.shutdown);

        system.shutdown();
        assert!(system.stats().shutdown);
        assert_eq!(system.stats().actors, 0);
    }

    #[test]
    fn test_start_is_idempotent() {
        let system = ActorSystem::new(test_config("twice")).unwrap();
        system.start().unwrap();
        system.start().unwrap();
        system.shutdown();
        system.shutdown();
        assert!(system.is_shutdown());
    }
}
