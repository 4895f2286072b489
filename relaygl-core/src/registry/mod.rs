//! Thread-safe handle → tracking-state tables.
//!
//! One [`Registry`] exists per resource class. Each carries its own lock,
//! so traffic on windows never waits behind traffic on contexts. Every
//! operation confines the lock to a single map access; there is no
//! iteration primitive that could hold it across a blocking call.
//!
//! ```text
//!  Unallocated ──insert──► Live ──kill──► Killed
//!       │                                   ▲
//!       └───────────────kill────────────────┘
//! ```
//!
//! A killed registry stays killed: lookups miss and inserts are dropped.

pub mod resources;

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::critical::CriticalGuard;

pub use resources::{
    ContextHandle, ContextState, DisplayHandle, DrawableHandle, DrawableKind, GlxDrawableState,
    PixmapState, Registries, TargetHandle, VisualId, VisualState, WindowKey, WindowState,
};

enum Slot<K, V> {
    Unallocated,
    Live(HashMap<K, V>),
    Killed,
}

/// A lazily allocated, killable map from native handle to tracking state.
pub struct Registry<K, V> {
    name: &'static str,
    slot: Mutex<Slot<K, V>>,
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Debug,
{
    /// Create an unallocated registry. No table exists until the first
    /// insert.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(Slot::Unallocated),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Look up `key`, returning a copy of its state.
    pub fn find(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        match &*self.slot.lock() {
            Slot::Live(map) => map.get(key).cloned(),
            _ => None,
        }
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        match &*self.slot.lock() {
            Slot::Live(map) => map.contains_key(key),
            _ => false,
        }
    }

    /// Insert or replace the state for `key`, returning the previous one.
    ///
    /// Allocates the table on first use. After [`kill`](Self::kill) the
    /// entry is dropped and `None` is returned.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut slot = self.slot.lock();
        match &mut *slot {
            Slot::Live(map) => map.insert(key, value),
            Slot::Unallocated => {
                debug!(registry = self.name, "allocating registry");
                let mut map = HashMap::new();
                map.insert(key, value);
                *slot = Slot::Live(map);
                None
            }
            Slot::Killed => {
                trace!(registry = self.name, ?key, "insert after kill ignored");
                None
            }
        }
    }

    /// Remove `key`, returning its state if it was present.
    pub fn remove(&self, key: &K) -> Option<V> {
        match &mut *self.slot.lock() {
            Slot::Live(map) => map.remove(key),
            _ => None,
        }
    }

    /// Remove `key` if `matches` accepts its current state.
    pub fn remove_if(&self, key: &K, matches: impl FnOnce(&V) -> bool) -> Option<V> {
        let mut slot = self.slot.lock();
        let Slot::Live(map) = &mut *slot else {
            return None;
        };
        if map.get(key).is_some_and(matches) {
            map.remove(key)
        } else {
            None
        }
    }

    /// Mutate the state for `key` in place under the registry lock.
    ///
    /// `f` must not block: it runs with the registry locked.
    pub fn update<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        match &mut *self.slot.lock() {
            Slot::Live(map) => map.get_mut(key).map(f),
            _ => None,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        match &*self.slot.lock() {
            Slot::Live(map) => map.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the table has been allocated and not yet killed.
    pub fn is_allocated(&self) -> bool {
        matches!(&*self.slot.lock(), Slot::Live(_))
    }

    /// Whether [`kill`](Self::kill) has run.
    pub fn is_killed(&self) -> bool {
        matches!(&*self.slot.lock(), Slot::Killed)
    }

    /// Release every entry and the table itself.
    ///
    /// Runs only under the critical section. Idempotent: killing twice,
    /// or killing a registry that was never allocated, does nothing
    /// beyond marking it killed. Returns the number of entries released.
    pub fn kill(&self, _cs: &CriticalGuard<'_>) -> usize {
        let previous = std::mem::replace(&mut *self.slot.lock(), Slot::Killed);
        match previous {
            Slot::Live(map) => {
                let released = map.len();
                debug!(registry = self.name, released, "registry killed");
                // Entries drop here, outside the registry lock.
                drop(map);
                released
            }
            Slot::Unallocated | Slot::Killed => 0,
        }
    }
}
