//! Player pool
//!
//! Engine construction is expensive, so released instances are kept for
//! reuse up to a fixed capacity. Instances live in a registry keyed by
//! [`EngineId`]; callers never hold an engine directly, only a move-only
//! [`PlayerLease`] that is checked on every access.

use crate::engine::{EngineFactory, MediaEngine};
use crate::{Error, MediaSource, Result, SourceKey};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry key of one engine instance
pub type EngineId = u64;

/// Exclusive right to drive one pooled engine instance
///
/// Not `Clone`: the lease is consumed by [`PlayerPool::release_lease`].
#[derive(Debug)]
pub struct PlayerLease {
    id: EngineId,
    generation: u64,
    key: SourceKey,
    warm: bool,
}

impl PlayerLease {
    pub fn id(&self) -> EngineId {
        self.id
    }

    pub fn key(&self) -> &SourceKey {
        &self.key
    }

    /// True when the instance was preloaded for this key and is already prepared
    pub fn is_warm(&self) -> bool {
        self.warm
    }
}

/// Snapshot of pool bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub active: usize,
    /// Leased instances whose key was taken over by a later acquisition
    pub detached: usize,
    /// Every instance the pool currently owns
    pub live: usize,
    pub capacity: usize,
}

struct Slot {
    engine: Box<dyn MediaEngine>,
    generation: u64,
    leased: bool,
}

#[derive(Default)]
struct PoolInner {
    slots: HashMap<EngineId, Slot>,
    idle: VecDeque<EngineId>,
    active: HashMap<SourceKey, EngineId>,
    detached: HashSet<EngineId>,
    next_id: EngineId,
    next_generation: u64,
}

impl PoolInner {
    fn generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Take an idle instance or construct a new one
    fn checkout(&mut self, factory: &dyn EngineFactory) -> Result<EngineId> {
        if let Some(id) = self.idle.pop_front() {
            debug!(engine_id = id, "Reusing idle player");
            return Ok(id);
        }
        let engine = factory
            .create()
            .map_err(|e| Error::EngineCreation(e.to_string()))?;
        self.next_id += 1;
        let id = self.next_id;
        let generation = self.generation();
        self.slots.insert(
            id,
            Slot {
                engine,
                generation,
                leased: false,
            },
        );
        info!(engine_id = id, "Created player instance");
        Ok(id)
    }

    /// Stop an instance and either park it or destroy it
    fn recycle(&mut self, id: EngineId, capacity: usize) {
        let generation = self.generation();
        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };
        slot.engine.set_listener(None);
        slot.engine.stop();
        slot.engine.clear_media_sources();
        slot.leased = false;
        slot.generation = generation;

        if self.idle.len() < capacity {
            self.idle.push_back(id);
            debug!(engine_id = id, idle = self.idle.len(), "Player returned to pool");
        } else if let Some(mut slot) = self.slots.remove(&id) {
            slot.engine.release();
            debug!(engine_id = id, "Pool full, player destroyed");
        }
    }
}

/// Owns every engine instance and hands out leases by source key
pub struct PlayerPool {
    factory: Arc<dyn EngineFactory>,
    capacity: usize,
    inner: Mutex<PoolInner>,
}

impl PlayerPool {
    pub fn new(factory: Arc<dyn EngineFactory>, capacity: usize) -> Self {
        Self {
            factory,
            capacity,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lease an instance for `key`
    ///
    /// An instance preloaded for `key` and not yet leased is adopted as-is.
    /// Otherwise any existing mapping for `key` is replaced; the displaced
    /// instance stays with its current lease holder.
    pub fn acquire(&self, key: &SourceKey) -> Result<PlayerLease> {
        let mut inner = self.inner.lock();

        if let Some(&id) = inner.active.get(key) {
            let generation = inner.generation();
            let adopted = match inner.slots.get_mut(&id) {
                Some(slot) if !slot.leased => {
                    slot.leased = true;
                    slot.generation = generation;
                    true
                }
                _ => false,
            };
            if adopted {
                info!(source = %key, engine_id = id, "Adopted preloaded player");
                return Ok(PlayerLease {
                    id,
                    generation,
                    key: key.clone(),
                    warm: true,
                });
            }
            warn!(source = %key, engine_id = id, "Replacing active player for key");
            inner.active.remove(key);
            inner.detached.insert(id);
        }

        let id = inner.checkout(self.factory.as_ref())?;
        let generation = inner.generation();
        if let Some(slot) = inner.slots.get_mut(&id) {
            slot.leased = true;
            slot.generation = generation;
        }
        inner.active.insert(key.clone(), id);
        debug!(source = %key, engine_id = id, "Player acquired");

        Ok(PlayerLease {
            id,
            generation,
            key: key.clone(),
            warm: false,
        })
    }

    /// Release whatever instance is active under `key`
    ///
    /// Any lease on it goes stale. Unknown keys are ignored.
    pub fn release(&self, key: &SourceKey) {
        let mut inner = self.inner.lock();
        match inner.active.remove(key) {
            Some(id) => {
                info!(source = %key, engine_id = id, "Releasing player");
                inner.recycle(id, self.capacity);
            }
            None => debug!(source = %key, "Release for unknown key ignored"),
        }
    }

    /// Return a leased instance; a stale lease is a no-op
    pub fn release_lease(&self, lease: PlayerLease) {
        let mut inner = self.inner.lock();
        let current = inner
            .slots
            .get(&lease.id)
            .is_some_and(|slot| slot.leased && slot.generation == lease.generation);
        if !current {
            debug!(source = %lease.key, engine_id = lease.id, "Stale lease released");
            return;
        }

        if !inner.detached.remove(&lease.id) && inner.active.get(&lease.key) == Some(&lease.id) {
            inner.active.remove(&lease.key);
        }
        debug!(source = %lease.key, engine_id = lease.id, "Lease returned");
        inner.recycle(lease.id, self.capacity);
    }

    /// Load `source` on an instance under `key` without starting playback
    ///
    /// Idempotent while `key` is active.
    pub fn preload(&self, key: &SourceKey, source: MediaSource) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.active.contains_key(key) {
            debug!(source = %key, "Already active, preload skipped");
            return Ok(());
        }

        let id = inner.checkout(self.factory.as_ref())?;
        let loaded = match inner.slots.get_mut(&id) {
            Some(slot) => {
                let engine = slot.engine.as_mut();
                engine.set_play_when_ready(false);
                match engine.set_media_sources(vec![source]) {
                    Ok(()) => {
                        engine.prepare();
                        true
                    }
                    Err(e) => {
                        warn!(source = %key, error = %e, "Preload failed");
                        false
                    }
                }
            }
            None => false,
        };

        if loaded {
            inner.active.insert(key.clone(), id);
            info!(source = %key, engine_id = id, "Player preloaded");
        } else {
            inner.recycle(id, self.capacity);
        }
        Ok(())
    }

    /// Run `f` against the leased engine
    ///
    /// Returns `None` when the lease is stale or the pool was shut down.
    pub fn with_engine<R>(
        &self,
        lease: &PlayerLease,
        f: impl FnOnce(&mut dyn MediaEngine) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.get_mut(&lease.id)?;
        if !slot.leased || slot.generation != lease.generation {
            return None;
        }
        Some(f(slot.engine.as_mut()))
    }

    pub fn is_lease_valid(&self, lease: &PlayerLease) -> bool {
        self.with_engine(lease, |_| ()).is_some()
    }

    pub fn is_active(&self, key: &SourceKey) -> bool {
        self.inner.lock().active.contains_key(key)
    }

    /// Destroy every instance and forget all bookkeeping
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        let count = inner.slots.len();
        for (_, mut slot) in inner.slots.drain() {
            slot.engine.set_listener(None);
            slot.engine.release();
        }
        inner.idle.clear();
        inner.active.clear();
        inner.detached.clear();
        info!(destroyed = count, "Player pool shut down");
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            idle: inner.idle.len(),
            active: inner.active.len(),
            detached: inner.detached.len(),
            live: inner.slots.len(),
            capacity: self.capacity,
        }
    }
}

impl std::fmt::Debug for PlayerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerPool")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}
