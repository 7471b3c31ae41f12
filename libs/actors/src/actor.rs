//! Actor Core
//!
//! An [`Actor`] owns a mailbox, two handler tables keyed by payload type
//! (online and offline), its Idle/Executing flag and the user behaviour that
//! holds its state.
//!
//! Handlers only ever run while the actor's Executing flag is held, so the
//! behaviour lock inside is uncontended on every path the system drives and
//! handler code mutates state through `&mut B` without locking at the call
//! site.
//!
//! # Handler registration
//!
//! ```rust,ignore
//! let actor = Actor::new("player-1", Player::default());
//! actor
//!     .register_online_handler(|player: &mut Player, ctx: &ActorContext, msg: &String| {
//!         player.last_chat = Some(msg.clone());
//!         ctx.reply(format!("ack from {}", ctx.id()));
//!         Ok(())
//!     })
//!     .route::<Attack>();   // Player: Handles<Attack>
//! system.add_actor(actor)?;
//! ```

use crate::config::DEFAULT_MAILBOX_CAPACITY;
use crate::error::panic_message;
use crate::messages::{payload_type_id, MessageEnvelope, Payload, SyncEnvelope, SyncOutcome};
use crate::registry::ActorId;
use crate::state::{ExecutionGuard, ExecutionState};
use crate::system::{ActorSystem, WeakActorSystem};
use crate::{ActorError, Result};
use crossbeam_channel as cb;
use parking_lot::{Mutex, RwLock};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of a user handler
pub type HandlerResult = anyhow::Result<()>;

/// Mailbox wait when the actor is not bound to a system
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause between acquire attempts while draining directly
const DRAIN_BACKOFF: Duration = Duration::from_millis(1);

/// User-defined actor state and lifecycle hooks
pub trait ActorBehavior: Send + 'static {
    /// Called for payloads with no online handler registered
    fn on_unmatched(&mut self, ctx: &ActorContext, payload: &(dyn Any + Send)) {
        let _ = (ctx, payload);
    }

    /// Called once when the owning system shuts down
    fn on_shutdown(&mut self) {}
}

/// Typed online handler implemented directly on a behaviour
pub trait Handles<M: Any + Send>: ActorBehavior {
    fn handle(&mut self, ctx: &ActorContext, message: &M) -> HandlerResult;
}

/// Typed offline handler implemented directly on a behaviour
pub trait HandlesOffline<M: Any + Send>: ActorBehavior {
    fn handle_offline(&mut self, ctx: &OfflineContext, message: &M) -> HandlerResult;
}

/// What an online handler can see and do
pub struct ActorContext {
    id: ActorId,
    sender: ActorId,
    system: Option<ActorSystem>,
}

impl ActorContext {
    pub(crate) fn new(id: ActorId, sender: ActorId, system: Option<ActorSystem>) -> Self {
        Self { id, sender, system }
    }

    /// The receiving actor
    pub fn id(&self) -> &ActorId {
        &self.id
    }

    /// Who sent the message being handled
    pub fn sender(&self) -> &ActorId {
        &self.sender
    }

    pub fn system(&self) -> Option<&ActorSystem> {
        self.system.as_ref()
    }

    /// Async send from this actor
    pub fn send<M: Any + Send>(&self, to: impl Into<ActorId>, message: M) -> bool {
        match &self.system {
            Some(system) => system.send_async(self.id.clone(), to, message),
            None => unbound(&self.id),
        }
    }

    /// Async send back to the sender of the current message
    pub fn reply<M: Any + Send>(&self, message: M) -> bool {
        self.send(self.sender.clone(), message)
    }

    /// Predatory sync call from this actor
    ///
    /// Blocks this handler's slot until the target is idle. Never target
    /// `self.id()`, nor an actor sharing this actor's sticky slot (see
    /// [`WorkerCenter::slot_index`](crate::WorkerCenter::slot_index)): its
    /// queued dispatch can never run while this handler waits, so the call
    /// hangs.
    pub fn talk_predatory<M: Any + Send>(&self, to: impl Into<ActorId>, message: M) -> bool {
        match &self.system {
            Some(system) => system.send_sync_predatory(self.id.clone(), to, message),
            None => unbound(&self.id),
        }
    }

    /// Orderly sync call from this actor
    ///
    /// Blocks this handler's slot until the message is processed. Never
    /// target `self.id()`, nor an actor sharing this actor's sticky slot:
    /// that actor's dispatch is queued behind the waiting handler, so the
    /// call hangs.
    pub fn talk_orderly<M: Any + Send>(&self, to: impl Into<ActorId>, message: M) -> bool {
        match &self.system {
            Some(system) => system.send_sync_orderly(self.id.clone(), to, message),
            None => unbound(&self.id),
        }
    }
}

/// What an offline handler can see: the sender (self) and the missing target
pub struct OfflineContext {
    id: ActorId,
    target: ActorId,
    system: Option<ActorSystem>,
}

impl OfflineContext {
    /// The sending actor that owns this offline handler
    pub fn id(&self) -> &ActorId {
        &self.id
    }

    /// The unregistered id the message was addressed to
    pub fn target(&self) -> &ActorId {
        &self.target
    }

    pub fn system(&self) -> Option<&ActorSystem> {
        self.system.as_ref()
    }
}

fn unbound(id: &ActorId) -> bool {
    error!(actor_id = %id, "Actor is not registered to any actor system, message dropped");
    false
}

type OnlineFn<B> =
    Arc<dyn Fn(&mut B, &ActorContext, &(dyn Any + Send)) -> HandlerResult + Send + Sync>;
type OfflineFn<B> =
    Arc<dyn Fn(&mut B, &OfflineContext, &(dyn Any + Send)) -> HandlerResult + Send + Sync>;

struct HandlerEntry<F> {
    type_name: &'static str,
    handler: F,
}

/// Object-safe view of an actor used by the system, dispatcher and workers
pub trait ActorCell: Send + Sync + 'static {
    fn id(&self) -> &ActorId;

    /// Non-blocking offer into the mailbox; false when a bounded mailbox is full
    fn enqueue(&self, sender: ActorId, payload: Payload) -> bool;

    /// Idle → Executing via compare-and-set
    fn try_acquire_executing(&self) -> bool;

    /// Executing → Idle
    fn release(&self);

    fn is_executing(&self) -> bool;

    /// Pop and process at most one envelope. Caller must hold Executing.
    fn consume_one(&self) -> bool;

    /// Acquire and consume repeatedly until the mailbox is observed empty
    fn drain_all(&self) -> usize;

    /// Run the handler pipeline inline. Caller must hold Executing.
    fn process(&self, sender: &ActorId, payload: Payload) -> Result<()>;

    /// Sender-side handling of a message whose target is not registered.
    /// Caller must hold Executing.
    fn handle_offline(&self, target: &ActorId, payload: Payload);

    fn bind_system(&self, system: WeakActorSystem);

    /// Run the shutdown hook (at most once)
    fn shutdown(&self);

    fn mailbox_len(&self) -> usize;

    /// Mailbox capacity, 0 meaning unbounded
    fn mailbox_capacity(&self) -> usize;
}

/// An actor with behaviour `B`
pub struct Actor<B: ActorBehavior> {
    id: ActorId,
    capacity: usize,
    mailbox_tx: cb::Sender<MessageEnvelope>,
    mailbox_rx: cb::Receiver<MessageEnvelope>,
    state: ExecutionState,
    behavior: Mutex<B>,
    online: RwLock<HashMap<TypeId, HandlerEntry<OnlineFn<B>>>>,
    offline: RwLock<HashMap<TypeId, HandlerEntry<OfflineFn<B>>>>,
    system: RwLock<Option<WeakActorSystem>>,
    shut_down: AtomicBool,
}

impl<B: ActorBehavior> Actor<B> {
    /// Actor with the default mailbox capacity (16)
    pub fn new(id: impl Into<ActorId>, behavior: B) -> Arc<Self> {
        Self::with_capacity(id, DEFAULT_MAILBOX_CAPACITY, behavior)
    }

    /// Actor with a bounded mailbox of `capacity`, or unbounded when 0
    pub fn with_capacity(id: impl Into<ActorId>, capacity: usize, behavior: B) -> Arc<Self> {
        let (mailbox_tx, mailbox_rx) = if capacity > 0 {
            cb::bounded(capacity)
        } else {
            cb::unbounded()
        };

        Arc::new(Self {
            id: id.into(),
            capacity,
            mailbox_tx,
            mailbox_rx,
            state: ExecutionState::new(),
            behavior: Mutex::new(behavior),
            online: RwLock::new(HashMap::new()),
            offline: RwLock::new(HashMap::new()),
            system: RwLock::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Associate payload type `M` with an online handler (last write wins)
    pub fn register_online_handler<M, F>(&self, handler: F) -> &Self
    where
        M: Any + Send,
        F: Fn(&mut B, &ActorContext, &M) -> HandlerResult + Send + Sync + 'static,
    {
        let erased: OnlineFn<B> = Arc::new(
            move |behavior: &mut B, ctx: &ActorContext, payload: &(dyn Any + Send)| {
                match payload.downcast_ref::<M>() {
                    Some(message) => handler(behavior, ctx, message),
                    None => Err(anyhow::anyhow!("payload is not a {}", type_name::<M>())),
                }
            },
        );

        let entry = HandlerEntry {
            type_name: type_name::<M>(),
            handler: erased,
        };
        if self.online.write().insert(TypeId::of::<M>(), entry).is_some() {
            info!(
                actor_id = %self.id,
                message_type = type_name::<M>(),
                "Online handler replaced by new registration"
            );
        }
        self
    }

    /// Associate payload type `M` with an offline handler (last write wins)
    pub fn register_offline_handler<M, F>(&self, handler: F) -> &Self
    where
        M: Any + Send,
        F: Fn(&mut B, &OfflineContext, &M) -> HandlerResult + Send + Sync + 'static,
    {
        let erased: OfflineFn<B> = Arc::new(
            move |behavior: &mut B, ctx: &OfflineContext, payload: &(dyn Any + Send)| {
                match payload.downcast_ref::<M>() {
                    Some(message) => handler(behavior, ctx, message),
                    None => Err(anyhow::anyhow!("payload is not a {}", type_name::<M>())),
                }
            },
        );

        let entry = HandlerEntry {
            type_name: type_name::<M>(),
            handler: erased,
        };
        if self.offline.write().insert(TypeId::of::<M>(), entry).is_some() {
            info!(
                actor_id = %self.id,
                message_type = type_name::<M>(),
                "Offline handler replaced by new registration"
            );
        }
        self
    }

    /// Register `B`'s own `Handles<M>` impl as the online handler for `M`
    pub fn route<M>(&self) -> &Self
    where
        M: Any + Send,
        B: Handles<M>,
    {
        self.register_online_handler::<M, _>(<B as Handles<M>>::handle)
    }

    /// Register `B`'s own `HandlesOffline<M>` impl as the offline handler for `M`
    pub fn route_offline<M>(&self) -> &Self
    where
        M: Any + Send,
        B: HandlesOffline<M>,
    {
        self.register_offline_handler::<M, _>(<B as HandlesOffline<M>>::handle_offline)
    }

    /// Payload type names with an online handler
    pub fn online_message_types(&self) -> Vec<&'static str> {
        self.online.read().values().map(|entry| entry.type_name).collect()
    }

    /// Payload type names with an offline handler
    pub fn offline_message_types(&self) -> Vec<&'static str> {
        self.offline.read().values().map(|entry| entry.type_name).collect()
    }

    /// Run `f` against the behaviour while holding Executing
    ///
    /// Spins (short sleeps) until the actor is idle, like a predatory call.
    pub fn inspect<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        let _guard = loop {
            if let Some(guard) = ExecutionGuard::try_acquire(self) {
                break guard;
            }
            thread::sleep(DRAIN_BACKOFF);
        };
        let behavior = self.behavior.lock();
        f(&behavior)
    }

    /// The system this actor is registered with, if it is still alive
    pub fn system(&self) -> Option<ActorSystem> {
        self.system.read().as_ref().and_then(WeakActorSystem::upgrade)
    }

    /// Async send from this actor through its system
    pub fn send<M: Any + Send>(&self, to: impl Into<ActorId>, message: M) -> bool {
        match self.system() {
            Some(system) => system.send_async(self.id.clone(), to, message),
            None => unbound(&self.id),
        }
    }

    /// Predatory sync call from this actor through its system
    pub fn talk_predatory<M: Any + Send>(&self, to: impl Into<ActorId>, message: M) -> bool {
        match self.system() {
            Some(system) => system.send_sync_predatory(self.id.clone(), to, message),
            None => unbound(&self.id),
        }
    }

    /// Orderly sync call from this actor through its system
    pub fn talk_orderly<M: Any + Send>(&self, to: impl Into<ActorId>, message: M) -> bool {
        match self.system() {
            Some(system) => system.send_sync_orderly(self.id.clone(), to, message),
            None => unbound(&self.id),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn poll_timeout(&self, system: Option<&ActorSystem>) -> Duration {
        system
            .map(|system| system.config().mailbox_poll_timeout())
            .unwrap_or(DEFAULT_POLL_TIMEOUT)
    }

    /// Look up by exact payload type and run the handler or the fallback
    fn dispatch_typed(&self, sender: &ActorId, payload: Payload, system: Option<ActorSystem>) -> Result<()> {
        let type_id = payload_type_id(&payload);
        let handler = self
            .online
            .read()
            .get(&type_id)
            .map(|entry| Arc::clone(&entry.handler));

        let ctx = ActorContext::new(self.id.clone(), sender.clone(), system);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut behavior = self.behavior.lock();
            match handler {
                Some(handler) => handler(&mut behavior, &ctx, &*payload),
                None => {
                    behavior.on_unmatched(&ctx, &*payload);
                    Ok(())
                }
            }
        }));

        let fault = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => format!("{:#}", err),
            Err(panic) => format!("panicked: {}", panic_message(&*panic)),
        };

        error!(
            actor_id = %self.id,
            sender = %sender,
            error = %fault,
            "Actor handler failed, message dropped"
        );
        if let Some(system) = ctx.system() {
            system.metrics().record_handler_fault();
        }
        Err(ActorError::handler_fault(self.id.as_str(), fault))
    }
}

impl<B: ActorBehavior> ActorCell for Actor<B> {
    fn id(&self) -> &ActorId {
        &self.id
    }

    fn enqueue(&self, sender: ActorId, payload: Payload) -> bool {
        self.mailbox_tx
            .try_send(MessageEnvelope::new(sender, payload))
            .is_ok()
    }

    fn try_acquire_executing(&self) -> bool {
        self.state.try_acquire()
    }

    fn release(&self) {
        if !self.state.release() {
            debug!(actor_id = %self.id, "Release called on an idle actor");
            return;
        }
        // a grant may be waiting on this actor
        if let Some(system) = self.system() {
            system.notify_dispatcher();
        }
    }

    fn is_executing(&self) -> bool {
        self.state.is_executing()
    }

    fn consume_one(&self) -> bool {
        let system = self.system();
        let envelope = match self.mailbox_rx.recv_timeout(self.poll_timeout(system.as_ref())) {
            Ok(envelope) => envelope,
            Err(_) => {
                warn!(actor_id = %self.id, "Empty dispatch, mailbox had nothing to consume");
                if let Some(system) = &system {
                    system.metrics().record_empty_dispatch();
                }
                return false;
            }
        };

        let (sender, payload) = envelope.into_parts();
        // faults are logged inside the pipeline
        let _ = self.process(&sender, payload);
        true
    }

    fn drain_all(&self) -> usize {
        let mut consumed = 0;
        loop {
            let Some(_guard) = ExecutionGuard::try_acquire(self) else {
                thread::sleep(DRAIN_BACKOFF);
                continue;
            };
            if self.mailbox_rx.is_empty() {
                break;
            }
            if self.consume_one() {
                consumed += 1;
            }
        }
        consumed
    }

    fn process(&self, sender: &ActorId, payload: Payload) -> Result<()> {
        let system = self.system();
        match payload.downcast::<SyncEnvelope>() {
            Ok(sync) => {
                let mut sync = *sync;
                let result = match sync.take_payload() {
                    Some(inner) => self.dispatch_typed(sender, inner, system),
                    None => Ok(()),
                };
                let outcome = if result.is_ok() {
                    SyncOutcome::Handled
                } else {
                    SyncOutcome::Faulted
                };
                sync.finish(outcome);
                result
            }
            Err(payload) => self.dispatch_typed(sender, payload, system),
        }
    }

    fn handle_offline(&self, target: &ActorId, payload: Payload) {
        let type_id = payload_type_id(&payload);
        let Some(handler) = self
            .offline
            .read()
            .get(&type_id)
            .map(|entry| Arc::clone(&entry.handler))
        else {
            debug!(
                actor_id = %self.id,
                target = %target,
                "No offline handler for payload type, message dropped"
            );
            return;
        };

        let ctx = OfflineContext {
            id: self.id.clone(),
            target: target.clone(),
            system: self.system(),
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut behavior = self.behavior.lock();
            handler(&mut behavior, &ctx, &*payload)
        }));

        let fault = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => format!("{:#}", err),
            Err(panic) => format!("panicked: {}", panic_message(&*panic)),
        };
        error!(
            actor_id = %self.id,
            target = %target,
            error = %fault,
            "Offline handler failed"
        );
        if let Some(system) = ctx.system() {
            system.metrics().record_handler_fault();
        }
    }

    fn bind_system(&self, system: WeakActorSystem) {
        *self.system.write() = Some(system);
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.behavior.lock().on_shutdown()));
        if let Err(panic) = outcome {
            error!(
                actor_id = %self.id,
                panic = %panic_message(&*panic),
                "Actor shutdown hook panicked"
            );
        }
        debug!(actor_id = %self.id, pending = self.mailbox_rx.len(), "Actor shut down");
    }

    fn mailbox_len(&self) -> usize {
        self.mailbox_rx.len()
    }

    fn mailbox_capacity(&self) -> usize {
        self.capacity
    }
}

impl<B: ActorBehavior> fmt::Debug for Actor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("mailbox_len", &self.mailbox_rx.len())
            .field("executing", &self.state.is_executing())
            .field("online_handlers", &self.online.read().len())
            .field("offline_handlers", &self.offline.read().len())
            .finish()
    }
}
