//! Actor Registry
//!
//! Concurrent id → actor map and the per-actor pending-message counters the
//! dispatcher drains. Both are sharded (`DashMap`) so a dispatcher pass can
//! walk the counters while senders insert and increment concurrently.

use crate::actor::ActorCell;
use dashmap::DashMap;
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Unique actor identifier within one system
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(Arc<str>);

impl ActorId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty or whitespace-only ids are rejected at registration
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ActorId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ActorId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActorId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ActorId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl From<&ActorId> for ActorId {
    fn from(id: &ActorId) -> Self {
        id.clone()
    }
}

/// Registered actors keyed by id
#[derive(Default)]
pub struct ActorRegistry {
    actors: DashMap<ActorId, Arc<dyn ActorCell>>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, returning whatever was registered under the same id before
    pub fn insert(&self, actor: Arc<dyn ActorCell>) -> Option<Arc<dyn ActorCell>> {
        self.actors.insert(actor.id().clone(), actor)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ActorCell>> {
        self.actors.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.actors.contains_key(id)
    }

    pub fn ids(&self) -> Vec<ActorId> {
        self.actors.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Remove every actor and hand them back to the caller
    pub fn drain(&self) -> Vec<Arc<dyn ActorCell>> {
        let ids = self.ids();
        ids.iter()
            .filter_map(|id| self.actors.remove(id.as_str()).map(|(_, actor)| actor))
            .collect()
    }
}

impl fmt::Debug for ActorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRegistry")
            .field("actors", &self.ids())
            .finish()
    }
}

/// Mailbox entries not yet granted for execution, per actor
///
/// Every mutation of one id's counter happens under that id's shard lock, so
/// increment, the checked decrement and the remove-when-zero never interleave
/// for the same key and the counter can not go negative.
#[derive(Debug, Default)]
pub struct PendingCounts {
    counts: DashMap<ActorId, usize>,
}

impl PendingCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more pending entry, creating the counter on first use
    pub fn increment(&self, id: &ActorId) -> usize {
        let mut count = self.counts.entry(id.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Consume one pending entry; false when there was none to take
    pub fn try_decrement(&self, id: &str) -> bool {
        match self.counts.get_mut(id) {
            Some(mut count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }

    /// Drop the counter only if it is still zero
    pub fn remove_if_drained(&self, id: &str) -> bool {
        self.counts.remove_if(id, |_, count| *count == 0).is_some()
    }

    /// Drop the counter unconditionally (stale entry)
    pub fn remove(&self, id: &str) -> Option<usize> {
        self.counts.remove(id).map(|(_, count)| count)
    }

    pub fn get(&self, id: &str) -> usize {
        self.counts.get(id).map(|count| *count).unwrap_or(0)
    }

    /// Snapshot of tracked ids; never hold map guards across a dispatch pass
    pub fn ids(&self) -> Vec<ActorId> {
        self.counts.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().map(|entry| *entry.value()).sum()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_id_blank_detection() {
        assert!(ActorId::new("").is_blank());
        assert!(ActorId::new("   ").is_blank());
        assert!(!ActorId::new("player-1").is_blank());
    }

    #[test]
    fn test_actor_id_borrows_as_str() {
        let map: DashMap<ActorId, u32> = DashMap::new();
        map.insert(ActorId::from("a"), 1);
        assert_eq!(map.get("a").map(|v| *v), Some(1));
        assert_eq!(ActorId::from(String::from("b")).to_string(), "b");
    }

    #[test]
    fn test_pending_counts_lifecycle() {
        let pending = PendingCounts::new();
        let id = ActorId::from("a");

        assert!(!pending.try_decrement("a"));
        assert_eq!(pending.increment(&id), 1);
        assert_eq!(pending.increment(&id), 2);
        assert_eq!(pending.total(), 2);

        // not drained yet
        assert!(!pending.remove_if_drained("a"));
        assert!(pending.try_decrement("a"));
        assert!(pending.try_decrement("a"));
        assert!(!pending.try_decrement("a"));
        assert_eq!(pending.get("a"), 0);

        assert!(pending.remove_if_drained("a"));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_registry_overwrites_and_drains() {
        use crate::actor::{Actor, ActorBehavior};

        struct Idle;
        impl ActorBehavior for Idle {}

        let registry = ActorRegistry::new();
        assert!(registry.insert(Actor::new("a", Idle)).is_none());
        assert!(registry.insert(Actor::with_capacity("a", 4, Idle)).is_some());
        registry.insert(Actor::new("b", Idle));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("a").map(|a| a.mailbox_capacity()), Some(4));
        assert!(registry.contains("b"));

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_pending_counts_concurrent_increments() {
        let pending = Arc::new(PendingCounts::new());
        let id = ActorId::from("hot");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pending = Arc::clone(&pending);
                let id = id.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        pending.increment(&id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pending.get("hot"), 8_000);
    }
}
