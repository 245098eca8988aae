// ── Generic reactive live collection ──
//
// Ordered storage with push-based change notification via `watch`
// channels. Order is meaningful (fault lists are most-recent-first), so
// the snapshot vector is the source of truth rather than a hash map.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::watch;

/// Entities stored in a [`LiveCollection`] expose a stable identity.
pub trait Keyed {
    type Key: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn key(&self) -> Self::Key;
}

/// Snapshot type shared with every observer.
pub type Snapshot<T> = Arc<Vec<Arc<T>>>;

/// An ordered, reactive collection for a single entity type.
///
/// Every effective mutation publishes a new snapshot and bumps a version
/// counter. Mutations that leave the contents unchanged do not notify, so
/// replaying an event never wakes observers.
pub struct LiveCollection<T: Keyed + Clone + PartialEq + Send + Sync + 'static> {
    /// Full snapshot, rebuilt on mutation for efficient subscription.
    snapshot: watch::Sender<Snapshot<T>>,

    /// Version counter, bumped on every effective mutation.
    version: watch::Sender<u64>,
}

impl<T: Keyed + Clone + PartialEq + Send + Sync + 'static> LiveCollection<T> {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        let (version, _) = watch::channel(0u64);
        Self { snapshot, version }
    }

    /// Replace every entity. Returns `true` if the contents changed.
    pub fn replace_all(&self, items: Vec<T>) -> bool {
        let changed = self.snapshot.send_if_modified(|snap| {
            let same = snap.len() == items.len()
                && snap.iter().zip(&items).all(|(old, new)| **old == *new);
            if same {
                return false;
            }
            *snap = Arc::new(items.into_iter().map(Arc::new).collect());
            true
        });
        self.bump_if(changed)
    }

    /// Insert at the front. Returns `false` (and changes nothing) if an
    /// entity with the same key is already present.
    pub fn prepend(&self, item: T) -> bool {
        let key = item.key();
        let changed = self.snapshot.send_if_modified(|snap| {
            if snap.iter().any(|e| e.key() == key) {
                return false;
            }
            Arc::make_mut(snap).insert(0, Arc::new(item));
            true
        });
        self.bump_if(changed)
    }

    /// Mutate the entity with `key` in place, preserving its position.
    ///
    /// Returns `None` if no such entity exists, otherwise whether the
    /// mutation changed anything.
    pub fn update(&self, key: T::Key, f: impl FnOnce(&mut T)) -> Option<bool> {
        let mut found = false;
        let changed = self.snapshot.send_if_modified(|snap| {
            let Some(index) = snap.iter().position(|e| e.key() == key) else {
                return false;
            };
            found = true;

            let mut updated = (*snap[index]).clone();
            f(&mut updated);
            if updated == *snap[index] {
                return false;
            }
            Arc::make_mut(snap)[index] = Arc::new(updated);
            true
        });
        self.bump_if(changed);
        found.then_some(changed)
    }

    /// Remove an entity by key. Returns the removed entity if it existed.
    pub fn remove(&self, key: T::Key) -> Option<Arc<T>> {
        let mut removed = None;
        let changed = self.snapshot.send_if_modified(|snap| {
            let Some(index) = snap.iter().position(|e| e.key() == key) else {
                return false;
            };
            removed = Some(Arc::make_mut(snap).remove(index));
            true
        });
        self.bump_if(changed);
        removed
    }

    /// Look up an entity by key.
    pub fn get(&self, key: T::Key) -> Option<Arc<T>> {
        self.snapshot
            .borrow()
            .iter()
            .find(|e| e.key() == key)
            .map(Arc::clone)
    }

    pub fn contains(&self, key: T::Key) -> bool {
        self.snapshot.borrow().iter().any(|e| e.key() == key)
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> Snapshot<T> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<T>> {
        self.snapshot.subscribe()
    }

    pub fn keys(&self) -> Vec<T::Key> {
        self.snapshot.borrow().iter().map(|e| e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.borrow().is_empty()
    }

    /// Number of effective mutations so far.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn bump_if(&self, changed: bool) -> bool {
        if changed {
            // `send_modify` updates unconditionally, even with zero receivers.
            self.version.send_modify(|v| *v += 1);
        }
        changed
    }
}

impl<T: Keyed + Clone + PartialEq + Send + Sync + 'static> Default for LiveCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}
