//! Execution State
//!
//! The Idle/Executing flag is the only mutual exclusion for an actor's
//! handlers. It is acquired with a compare-and-set and always released by a
//! drop guard, so every exit path (normal return, handler error, panic, or a
//! task that is dropped before it runs) puts the actor back to Idle.

use crate::actor::ActorCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Two-state execution flag: Idle (initial) or Executing
#[derive(Debug, Default)]
pub struct ExecutionState {
    executing: AtomicBool,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idle → Executing; exactly one racing caller wins
    pub fn try_acquire(&self) -> bool {
        self.executing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Executing → Idle; false if the flag was already Idle
    pub fn release(&self) -> bool {
        self.executing
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }
}

/// Scoped ownership of an actor's Executing state
pub struct ExecutionGuard<'a, C: ActorCell + ?Sized> {
    cell: &'a C,
}

impl<'a, C: ActorCell + ?Sized> ExecutionGuard<'a, C> {
    pub fn try_acquire(cell: &'a C) -> Option<Self> {
        cell.try_acquire_executing().then_some(Self { cell })
    }
}

impl<C: ActorCell + ?Sized> Drop for ExecutionGuard<'_, C> {
    fn drop(&mut self) {
        self.cell.release();
    }
}

/// Owned Executing state that can be moved into a worker task
pub struct ExecutionPermit {
    cell: Arc<dyn ActorCell>,
}

impl ExecutionPermit {
    pub fn try_acquire(cell: &Arc<dyn ActorCell>) -> Option<Self> {
        cell.try_acquire_executing().then(|| Self {
            cell: Arc::clone(cell),
        })
    }

    pub fn cell(&self) -> &Arc<dyn ActorCell> {
        &self.cell
    }
}

impl Drop for ExecutionPermit {
    fn drop(&mut self) {
        self.cell.release();
    }
}

impl fmt::Debug for ExecutionPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPermit")
            .field("actor", self.cell.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_state_transitions() {
        let state = ExecutionState::new();
        assert!(!state.is_executing());
        assert!(!state.release());

        assert!(state.try_acquire());
        assert!(state.is_executing());
        assert!(!state.try_acquire());

        assert!(state.release());
        assert!(!state.is_executing());
    }

    #[test]
    fn test_exactly_one_racer_wins() {
        const RACERS: usize = 16;

        for _ in 0..50 {
            let state = Arc::new(ExecutionState::new());
            let winners = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(Barrier::new(RACERS));

            let handles: Vec<_> = (0..RACERS)
                .map(|_| {
                    let state = Arc::clone(&state);
                    let winners = Arc::clone(&winners);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        if state.try_acquire() {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(winners.load(Ordering::SeqCst), 1);
        }
    }
}
