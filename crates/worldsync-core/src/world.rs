//! The shared world store.
//!
//! [`WorldStore`] maps entity ids to their field sets and fans every
//! mutation out to registered listeners before the mutating call returns.
//!
//! # Locking
//!
//! Three locks, always taken in this order:
//!
//! 1. `commit` -- a single-writer mutex held for the whole of a mutation
//!    *and* its notification pass. This gives every listener the same
//!    total order of world states that the mutating calls happened in.
//! 2. `entities` -- a read-write lock over the map itself. Readers
//!    (`get`, `snapshot`) only ever take this one, so they are never held
//!    up by a slow notification pass.
//! 3. `listeners` -- the registry. Held only long enough to copy out a
//!    snapshot of registrations, so listeners may add or remove
//!    registrations (including their own) while being invoked.
//!
//! Listeners run while `commit` is held. They must not block and must not
//! mutate the store; they are expected to enqueue work and return.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::ids::ListenerId;

/// The field mapping of one entity.
pub type Fields = Map<String, Value>;

/// The complete world: entity id to field mapping.
pub type WorldMap = BTreeMap<String, Fields>;

/// Callback invoked with `(entity_id, current_fields)` after each mutation.
pub type Listener = Arc<dyn Fn(&str, &Fields) + Send + Sync>;

/// A listener together with the id it was registered under.
struct Registration {
    id: ListenerId,
    listener: Listener,
}

/// Concurrency-safe store of every entity in the shared world.
///
/// Construct one per process and share it via [`Arc`]. All methods take
/// `&self`; no lock is ever handed out to callers.
pub struct WorldStore {
    /// Serializes mutation + notification.
    commit: Mutex<()>,
    /// Entity id to fields.
    entities: RwLock<WorldMap>,
    /// Registered listeners in registration order.
    listeners: Mutex<Vec<Registration>>,
    /// Next listener id to hand out.
    next_listener: AtomicU64,
}

impl WorldStore {
    /// Create an empty world with no listeners.
    pub const fn new() -> Self {
        Self {
            commit: Mutex::new(()),
            entities: RwLock::new(BTreeMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Return a copy of an entity's fields, or an empty mapping if the
    /// entity has never been written.
    pub fn get(&self, entity: &str) -> Fields {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity)
            .cloned()
            .unwrap_or_default()
    }

    /// Return a copy of the whole world.
    pub fn snapshot(&self) -> WorldMap {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of entities currently stored.
    pub fn entity_count(&self) -> usize {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Replace an entity's fields wholesale, then notify listeners.
    ///
    /// Fields present before but absent from `fields` are dropped.
    pub fn set(&self, entity: &str, fields: Fields) {
        let _commit = self.lock_commit();
        self.write_entities().insert(entity.to_owned(), fields);
        self.notify_locked(entity);
    }

    /// Merge a single field into an entity (creating the entity if it is
    /// absent), then notify listeners.
    pub fn update(&self, entity: &str, key: &str, value: Value) {
        let _commit = self.lock_commit();
        self.write_entities()
            .entry(entity.to_owned())
            .or_default()
            .insert(key.to_owned(), value);
        self.notify_locked(entity);
    }

    /// Reset the world to empty.
    ///
    /// Listeners are not notified; subscribers only see the reset on their
    /// next full-world read. Readers observe either the old world or the
    /// empty one, never a partially cleared map.
    pub fn clear(&self) {
        let _commit = self.lock_commit();
        let removed = std::mem::take(&mut *self.write_entities()).len();
        debug!(removed, "World cleared");
    }

    // -----------------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------------

    /// Register a listener and return its id.
    ///
    /// Registering the same [`Arc`] twice is a no-op that returns the id of
    /// the existing registration. Safe to call from inside a listener.
    pub fn add_listener(&self, listener: Listener) -> ListenerId {
        let mut listeners = self.lock_listeners();
        if let Some(existing) = listeners
            .iter()
            .find(|r| Arc::ptr_eq(&r.listener, &listener))
        {
            return existing.id;
        }
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        listeners.push(Registration { id, listener });
        trace!(%id, "Listener registered");
        id
    }

    /// Register a listener after handing a snapshot of the world to `seed`.
    ///
    /// The snapshot, the call to `seed`, and the registration all happen
    /// under the writer lock, so no mutation can fall between the snapshot
    /// and the listener's first notification. A subscriber that enqueues
    /// the snapshot from `seed` therefore always sees it first.
    pub fn register_with_snapshot<F>(&self, listener: Listener, seed: F) -> ListenerId
    where
        F: FnOnce(&WorldMap),
    {
        let _commit = self.lock_commit();
        seed(&self.snapshot());
        self.add_listener(listener)
    }

    /// Unregister a listener.
    ///
    /// Returns `false` if the id was not registered (already removed, or
    /// swept by [`remove_all_listeners`](Self::remove_all_listeners)).
    /// Never fails; safe to call from inside a listener.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        let removed = listeners.len() != before;
        if removed {
            trace!(%id, "Listener removed");
        }
        removed
    }

    /// Unregister every listener, returning how many were removed.
    pub fn remove_all_listeners(&self) -> usize {
        let removed = std::mem::take(&mut *self.lock_listeners()).len();
        debug!(removed, "All listeners removed");
        removed
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    /// Invoke every registered listener with the entity's current fields.
    ///
    /// Mutations call this automatically; it is public so callers can
    /// re-announce an entity without changing it.
    pub fn notify(&self, entity: &str) {
        let _commit = self.lock_commit();
        self.notify_locked(entity);
    }

    /// Notification pass. Caller must hold `commit`.
    fn notify_locked(&self, entity: &str) {
        let registrations: Vec<Listener> = self
            .lock_listeners()
            .iter()
            .map(|r| Arc::clone(&r.listener))
            .collect();
        if registrations.is_empty() {
            return;
        }
        let fields = self.get(entity);
        for listener in &registrations {
            listener(entity, &fields);
        }
        trace!(entity, listeners = registrations.len(), "Listeners notified");
    }

    // -----------------------------------------------------------------------
    // Lock helpers
    // -----------------------------------------------------------------------
    //
    // A panicking listener poisons `commit`; the map itself is only ever
    // written in single statements, so recovering the guard is sound.

    fn lock_commit(&self) -> MutexGuard<'_, ()> {
        self.commit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<Registration>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entities(&self) -> std::sync::RwLockWriteGuard<'_, WorldMap> {
        self.entities.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for WorldStore {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for WorldStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorldStore")
            .field("entities", &self.entity_count())
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}
