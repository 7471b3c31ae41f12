//! Message Envelopes
//!
//! Carriers for a sender id plus an opaque payload. Handlers are selected by
//! the payload's concrete type, so payloads travel as `Box<dyn Any + Send>`.
//!
//! A [`SyncEnvelope`] is itself a payload: the orderly synchronous path
//! wraps the caller's message in one, enqueues it like any other message and
//! waits on its completion latch.

use crate::registry::ActorId;
use parking_lot::{Condvar, Mutex};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Type-erased message body
pub type Payload = Box<dyn Any + Send>;

/// Concrete type of a boxed payload (not the type of the box)
pub fn payload_type_id(payload: &Payload) -> TypeId {
    Any::type_id(&**payload)
}

/// Immutable sender + payload pair stored in a mailbox
pub struct MessageEnvelope {
    sender: ActorId,
    payload: Payload,
}

impl MessageEnvelope {
    pub fn new(sender: ActorId, payload: Payload) -> Self {
        Self { sender, payload }
    }

    pub fn sender(&self) -> &ActorId {
        &self.sender
    }

    pub fn payload(&self) -> &(dyn Any + Send) {
        &*self.payload
    }

    pub fn is_sync(&self) -> bool {
        self.payload.is::<SyncEnvelope>()
    }

    pub fn into_parts(self) -> (ActorId, Payload) {
        (self.sender, self.payload)
    }
}

impl fmt::Debug for MessageEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEnvelope")
            .field("sender", &self.sender)
            .field("sync", &self.is_sync())
            .finish()
    }
}

/// How an orderly synchronous call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Handler (or the unmatched fallback) ran to completion
    Handled,
    /// Handler returned an error or panicked
    Faulted,
    /// Envelope was dropped without ever being processed
    Abandoned,
}

/// Single-fire completion signal
#[derive(Debug, Default)]
pub struct CompletionLatch {
    outcome: Mutex<Option<SyncOutcome>>,
    fired: Condvar,
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome and wake waiters; later calls are ignored
    pub fn complete(&self, outcome: SyncOutcome) -> bool {
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.fired.notify_all();
        true
    }

    /// Block until the latch fires. There is no timeout.
    pub fn wait(&self) -> SyncOutcome {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = *slot {
                return outcome;
            }
            self.fired.wait(&mut slot);
        }
    }

    pub fn outcome(&self) -> Option<SyncOutcome> {
        *self.outcome.lock()
    }

    pub fn is_complete(&self) -> bool {
        self.outcome.lock().is_some()
    }
}

/// Payload wrapper for orderly synchronous calls
///
/// Consumed exactly once: [`SyncEnvelope::finish`] fires the latch, and an
/// envelope dropped unprocessed (full mailbox, shutdown) fires `Abandoned`
/// so its waiter is released.
pub struct SyncEnvelope {
    sender: ActorId,
    payload: Option<Payload>,
    latch: Arc<CompletionLatch>,
}

impl SyncEnvelope {
    pub fn new(sender: ActorId, payload: Payload) -> Self {
        Self {
            sender,
            payload: Some(payload),
            latch: Arc::new(CompletionLatch::new()),
        }
    }

    pub fn sender(&self) -> &ActorId {
        &self.sender
    }

    /// Shared handle for the waiting caller
    pub fn latch(&self) -> Arc<CompletionLatch> {
        Arc::clone(&self.latch)
    }

    /// Take the inner payload out for dispatch
    pub fn take_payload(&mut self) -> Option<Payload> {
        self.payload.take()
    }

    pub fn finish(self, outcome: SyncOutcome) {
        self.latch.complete(outcome);
    }
}

impl Drop for SyncEnvelope {
    fn drop(&mut self) {
        // no-op if finish() already fired
        self.latch.complete(SyncOutcome::Abandoned);
    }
}

impl fmt::Debug for SyncEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEnvelope")
            .field("sender", &self.sender)
            .field("outcome", &self.latch.outcome())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_payload_type_id_sees_inner_type() {
        let payload: Payload = Box::new(String::from("hello"));
        assert_eq!(payload_type_id(&payload), TypeId::of::<String>());
        assert_ne!(payload_type_id(&payload), TypeId::of::<Payload>());
    }

    #[test]
    fn test_envelope_detects_sync_payload() {
        let plain = MessageEnvelope::new(ActorId::from("x"), Box::new(42_i32));
        assert!(!plain.is_sync());
        assert_eq!(plain.payload().downcast_ref::<i32>(), Some(&42));

        let sync = SyncEnvelope::new(ActorId::from("x"), Box::new(1_u8));
        let wrapped = MessageEnvelope::new(ActorId::from("x"), Box::new(sync));
        assert!(wrapped.is_sync());
    }

    #[test]
    fn test_latch_fires_once() {
        let latch = CompletionLatch::new();
        assert!(latch.complete(SyncOutcome::Handled));
        assert!(!latch.complete(SyncOutcome::Faulted));
        assert_eq!(latch.wait(), SyncOutcome::Handled);
    }

    #[test]
    fn test_latch_releases_waiter_across_threads() {
        let envelope = SyncEnvelope::new(ActorId::from("caller"), Box::new("ping"));
        let latch = envelope.latch();

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            envelope.finish(SyncOutcome::Handled);
        });

        assert_eq!(latch.wait(), SyncOutcome::Handled);
        worker.join().unwrap();
    }

    #[test]
    fn test_dropped_envelope_is_abandoned() {
        let envelope = SyncEnvelope::new(ActorId::from("caller"), Box::new(5_u64));
        let latch = envelope.latch();
        drop(envelope);
        assert_eq!(latch.outcome(), Some(SyncOutcome::Abandoned));
    }
}
