//! In-Process Actor Runtime
//!
//! Actors with private mailboxes, a single dispatcher thread, and a worker
//! center of sticky execution slots. Every path that runs an actor's handler
//! (a dispatched worker task or a predatory caller) must first win the
//! actor's Idle → Executing compare-and-set, which is the only mutual
//! exclusion an actor's state ever needs.
//!
//! # Architecture
//!
//! ```text
//!  send_async ──► mailbox ──► pending count ──► dispatcher ──► WorkerCenter
//!      │                                          (1 thread)    slot = crc32(id) % N + 1
//!      │ target unregistered                                        │
//!      └──► sender's offline handler (on a worker slot)             ▼
//!                                                             consume_one()
//!  send_sync_orderly ──► SyncEnvelope through the mailbox, caller waits on latch
//!  send_sync_predatory ──► caller acquires Executing and runs the handler inline
//! ```
//!
//! # Examples
//!
//! ```rust,no_run
//! use actor_runtime::{ActorBehavior, ActorContext, ActorSystem, HandlerResult, Handles};
//!
//! #[derive(Default)]
//! struct Greeter {
//!     greeted: usize,
//! }
//!
//! impl ActorBehavior for Greeter {}
//!
//! impl Handles<String> for Greeter {
//!     fn handle(&mut self, ctx: &ActorContext, name: &String) -> HandlerResult {
//!         self.greeted += 1;
//!         println!("hello {} (from {})", name, ctx.sender());
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> actor_runtime::Result<()> {
//! let system = ActorSystem::launch("greetings")?;
//! let greeter = system.create_actor("greeter", Greeter::default())?;
//! greeter.route::<String>();
//!
//! system.send_async("main", "greeter", "world".to_string());
//! system.send_sync_orderly("main", "greeter", "again".to_string());
//! system.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod messages;
pub mod registry;
pub mod state;
pub mod system;
pub mod worker;

pub use actor::{
    Actor, ActorBehavior, ActorCell, ActorContext, HandlerResult, Handles, HandlesOffline,
    OfflineContext,
};
pub use config::{ActorSystemConfig, WorkerKind, DEFAULT_MAILBOX_CAPACITY};
pub use dispatcher::DispatchSignal;
pub use error::{ActorError, Result};
pub use messages::{CompletionLatch, MessageEnvelope, Payload, SyncEnvelope, SyncOutcome};
pub use registry::{ActorId, ActorRegistry, PendingCounts};
pub use state::{ExecutionGuard, ExecutionPermit, ExecutionState};
pub use system::{ActorSystem, Delivery, SystemMetrics, SystemStats, WeakActorSystem};
pub use worker::{ExecutionSlot, SlotFactory, TaskSlot, ThreadSlot, WorkerCenter};
