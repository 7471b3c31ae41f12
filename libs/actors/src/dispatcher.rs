//! Dispatcher Loop
//!
//! One background thread per system. Each pass walks a snapshot of the
//! pending counts and, for every actor that is Idle with at least one
//! undispatched message, acquires Executing, decrements the count and hands a
//! single `consume_one` to the actor's sticky execution slot.
//!
//! The loop throttles itself when there is nothing to do: after
//! `idle_tick_threshold` empty passes it parks on the [`DispatchSignal`] for
//! up to `idle_sleep`, and a pass where every pending actor is busy parks for
//! `busy_backoff`. Enqueues and releases notify the signal so a parked
//! dispatcher wakes immediately.

use crate::error::panic_message;
use crate::state::ExecutionPermit;
use crate::system::{ActorSystem, WeakActorSystem};
use parking_lot::{Condvar, Mutex};
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Wake-up flag shared between senders and the dispatcher
///
/// A notify that arrives while the dispatcher is busy is remembered, so the
/// next wait returns at once.
#[derive(Debug, Default)]
pub struct DispatchSignal {
    notified: Mutex<bool>,
    wakeup: Condvar,
}

impl DispatchSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let mut notified = self.notified.lock();
        *notified = true;
        self.wakeup.notify_one();
    }

    /// Park for up to `timeout`; true if woken by a notify
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut notified = self.notified.lock();
        if !*notified {
            self.wakeup.wait_for(&mut notified, timeout);
        }
        std::mem::replace(&mut *notified, false)
    }
}

/// Loop bookkeeping carried across ticks
#[derive(Debug, Default)]
struct DispatchLoop {
    empty_ticks: u32,
}

impl DispatchLoop {
    fn tick(&mut self, system: &ActorSystem) -> ControlFlow<()> {
        let shared = system.shared();

        if shared.pending.is_empty() {
            if shared.is_shutting_down() {
                return ControlFlow::Break(());
            }
            self.empty_ticks = self.empty_ticks.saturating_add(1);
            if self.empty_ticks > shared.config.idle_tick_threshold {
                if shared.signal.wait_timeout(shared.config.idle_sleep()) {
                    self.empty_ticks = 0;
                }
            } else {
                thread::yield_now();
            }
            return ControlFlow::Continue(());
        }

        let granted = dispatch_pass(system);
        if granted > 0 {
            self.empty_ticks = 0;
        } else {
            // every pending actor is executing; its release will notify
            shared.signal.wait_timeout(shared.config.busy_backoff());
        }
        ControlFlow::Continue(())
    }
}

/// One sweep over the pending actors; returns the number of grants
pub(crate) fn dispatch_pass(system: &ActorSystem) -> usize {
    let shared = system.shared();
    let mut granted = 0;

    for id in shared.pending.ids() {
        if shared.pending.remove_if_drained(id.as_str()) {
            continue;
        }

        let Some(cell) = shared.registry.get(id.as_str()) else {
            warn!(actor_id = %id, "Pending messages for unregistered actor, discarding count");
            shared.pending.remove(id.as_str());
            continue;
        };

        if cell.is_executing() {
            continue;
        }
        let Some(permit) = ExecutionPermit::try_acquire(&cell) else {
            continue;
        };
        if !shared.pending.try_decrement(id.as_str()) {
            // drained by someone else between the snapshot and now
            continue;
        }

        shared.metrics.record_dispatch_grant();
        granted += 1;
        trace!(actor_id = %id, "Dispatching one message");

        let task = Box::new(move || {
            permit.cell().consume_one();
        });
        if let Err(err) = shared.workers.submit(id.as_str(), task) {
            // the rejected task (and its permit) is dropped, releasing Executing
            error!(actor_id = %id, error = %err, "Failed to submit dispatch to worker center");
        }
    }

    granted
}

/// Dispatcher thread body
///
/// Holds only a weak handle between ticks, so dropping every
/// [`ActorSystem`] handle also ends the loop.
pub(crate) fn run(system: WeakActorSystem) {
    let mut state = DispatchLoop::default();
    info!("Actor system dispatcher started");

    loop {
        let Some(strong) = system.upgrade() else {
            debug!("Actor system dropped, dispatcher exiting");
            break;
        };

        let flow = panic::catch_unwind(AssertUnwindSafe(|| state.tick(&strong)));
        match flow {
            Ok(ControlFlow::Continue(())) => {}
            Ok(ControlFlow::Break(())) => {
                info!(system = %strong.name(), "Dispatcher stopped, nothing left to dispatch");
                break;
            }
            Err(panic) => {
                error!(
                    system = %strong.name(),
                    panic = %panic_message(&*panic),
                    "Dispatcher tick panicked, continuing"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_signal_remembers_early_notify() {
        let signal = DispatchSignal::new();
        signal.notify();
        let start = Instant::now();
        assert!(signal.wait_timeout(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        // flag was consumed
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_signal_wakes_parked_waiter() {
        let signal = Arc::new(DispatchSignal::new());
        let notifier = Arc::clone(&signal);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            notifier.notify();
        });

        let start = Instant::now();
        assert!(signal.wait_timeout(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(4));
        handle.join().unwrap();
    }
}
