//! Execution Slots and the Worker Center
//!
//! An execution slot runs submitted tasks one at a time, in submission
//! order, and keeps a panicking task from taking the slot down with it. Two
//! interchangeable flavours exist:
//!
//! - [`ThreadSlot`]: a dedicated OS thread draining a crossbeam channel
//! - [`TaskSlot`]: a single-threaded tokio runtime on its own thread draining
//!   an mpsc channel
//!
//! The [`WorkerCenter`] owns slots `1..=N` plus overflow slot `0` and routes
//! every task for a given actor id to the same slot (sticky routing), which
//! backs up the per-actor Executing flag with per-slot serialization.

use crate::config::WorkerKind;
use crate::error::panic_message;
use crate::{ActorError, Result};
use crossbeam_channel as cb;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Unit of work submitted to a slot
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Sequential, failure-isolating executor
pub trait ExecutionSlot: Send + Sync {
    fn name(&self) -> &str;

    /// Queue a task; fails once the slot has been shut down
    fn execute(&self, task: Task) -> Result<()>;

    /// Stop accepting tasks, let queued ones finish, and stop the slot
    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;
}

/// Builds the slots of a worker center
pub trait SlotFactory: Send + Sync {
    fn create(&self, center: &str, index: usize) -> Result<Arc<dyn ExecutionSlot>>;
}

impl<F> SlotFactory for F
where
    F: Fn(&str, usize) -> Result<Arc<dyn ExecutionSlot>> + Send + Sync,
{
    fn create(&self, center: &str, index: usize) -> Result<Arc<dyn ExecutionSlot>> {
        self(center, index)
    }
}

impl SlotFactory for WorkerKind {
    fn create(&self, center: &str, index: usize) -> Result<Arc<dyn ExecutionSlot>> {
        let name = format!("{}-{}", center, index);
        Ok(match self {
            WorkerKind::Thread => Arc::new(ThreadSlot::spawn(name)?),
            WorkerKind::Task => Arc::new(TaskSlot::spawn(name)?),
        })
    }
}

/// Run one task, logging instead of propagating a panic
fn run_isolated(slot: &str, task: Task) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(task)) {
        error!(
            slot = %slot,
            panic = %panic_message(&*panic),
            "Uncaught fault in execution slot task"
        );
    }
}

fn join_unless_current(slot: &str, handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        // shutting down from inside the slot itself; the loop exits on its own
        return;
    }
    if handle.join().is_err() {
        error!(slot = %slot, "Execution slot thread terminated abnormally");
    }
}

/// Slot backed by a dedicated OS thread
pub struct ThreadSlot {
    name: String,
    sender: Mutex<Option<cb::Sender<Task>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadSlot {
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = cb::unbounded::<Task>();

        let slot_name = name.clone();
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                for task in receiver.iter() {
                    run_isolated(&slot_name, task);
                }
                debug!(slot = %slot_name, "Thread slot stopped");
            })
            .map_err(|source| ActorError::SlotSpawn {
                slot: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(thread)),
        })
    }
}

impl ExecutionSlot for ThreadSlot {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, task: Task) -> Result<()> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender
                .send(task)
                .map_err(|_| ActorError::slot_closed(&self.name)),
            None => Err(ActorError::slot_closed(&self.name)),
        }
    }

    fn shutdown(&self) {
        // dropping the sender ends the receive loop after the backlog
        drop(self.sender.lock().take());
        if let Some(handle) = self.thread.lock().take() {
            join_unless_current(&self.name, handle);
        }
    }

    fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl fmt::Debug for ThreadSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSlot")
            .field("name", &self.name)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Slot backed by a single-threaded tokio runtime
///
/// Tasks are pulled from the channel by one async loop, so at most one runs
/// at a time and they run in submission order.
pub struct TaskSlot {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TaskSlot {
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|source| ActorError::SlotSpawn {
                slot: name.clone(),
                source,
            })?;
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();

        let slot_name = name.clone();
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                runtime.block_on(async {
                    while let Some(task) = receiver.recv().await {
                        run_isolated(&slot_name, task);
                        tokio::task::yield_now().await;
                    }
                });
                debug!(slot = %slot_name, "Task slot stopped");
            })
            .map_err(|source| ActorError::SlotSpawn {
                slot: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(thread)),
        })
    }
}

impl ExecutionSlot for TaskSlot {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, task: Task) -> Result<()> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender
                .send(task)
                .map_err(|_| ActorError::slot_closed(&self.name)),
            None => Err(ActorError::slot_closed(&self.name)),
        }
    }

    fn shutdown(&self) {
        drop(self.sender.lock().take());
        if let Some(handle) = self.thread.lock().take() {
            join_unless_current(&self.name, handle);
        }
    }

    fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl fmt::Debug for TaskSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSlot")
            .field("name", &self.name)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Slot number for an actor id: `crc32(id) mod N + 1`, or 0 with no slots
pub fn sticky_slot_index(actor_id: &str, worker_count: usize) -> usize {
    if worker_count == 0 {
        return 0;
    }
    crc32fast::hash(actor_id.as_bytes()) as usize % worker_count + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotRoute {
    Numbered(usize),
    /// Configured with zero numbered slots
    Overflow,
    /// Index outside `1..=N`
    Missing(usize),
}

/// Owns the numbered slots plus the overflow slot
pub struct WorkerCenter {
    name: String,
    /// `slots[i]` is slot number `i + 1`
    slots: Vec<Arc<dyn ExecutionSlot>>,
    overflow: Arc<dyn ExecutionSlot>,
    shutdown: AtomicBool,
}

impl WorkerCenter {
    pub fn new(
        name: impl Into<String>,
        worker_count: usize,
        factory: &dyn SlotFactory,
    ) -> Result<Self> {
        let name = name.into();
        let slots = (1..=worker_count)
            .map(|index| factory.create(&name, index))
            .collect::<Result<Vec<_>>>()?;
        let overflow = factory.create(&name, 0)?;

        info!(
            center = %name,
            worker_count,
            "Worker center started"
        );

        Ok(Self {
            name,
            slots,
            overflow,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Worker center built from one of the stock slot kinds
    pub fn with_kind(name: impl Into<String>, worker_count: usize, kind: WorkerKind) -> Result<Self> {
        Self::new(name, worker_count, &kind)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_index(&self, actor_id: &str) -> usize {
        sticky_slot_index(actor_id, self.slots.len())
    }

    /// Where a task for slot number `index` lands
    fn route(&self, index: usize) -> SlotRoute {
        if self.slots.is_empty() {
            SlotRoute::Overflow
        } else if (1..=self.slots.len()).contains(&index) {
            SlotRoute::Numbered(index)
        } else {
            SlotRoute::Missing(index)
        }
    }

    /// Queue a task on the actor's sticky slot
    pub fn submit(&self, actor_id: &str, task: Task) -> Result<()> {
        let slot = match self.route(self.slot_index(actor_id)) {
            SlotRoute::Numbered(index) => &self.slots[index - 1],
            SlotRoute::Overflow => {
                debug!(center = %self.name, actor_id = %actor_id, "No numbered slots, using overflow slot");
                &self.overflow
            }
            SlotRoute::Missing(index) => {
                warn!(
                    center = %self.name,
                    actor_id = %actor_id,
                    slot = index,
                    "No execution slot for index, routing to overflow slot"
                );
                &self.overflow
            }
        };
        slot.execute(task)
    }

    /// Shut down every slot, overflow included
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        for slot in self.slots.iter().chain(std::iter::once(&self.overflow)) {
            slot.shutdown();
        }
        info!(center = %self.name, "Worker center shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl fmt::Debug for WorkerCenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerCenter")
            .field("name", &self.name)
            .field("worker_count", &self.slots.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
