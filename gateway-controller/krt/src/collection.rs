use crate::{runtime::NodeId, Key, Keyed};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// A read handle to a keyed set of objects.
pub struct Collection<T> {
    store: Arc<Store<T>>,
}

/// A change to a collection, as delivered to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum Event<T> {
    Added { key: Key, new: Arc<T> },
    Updated { key: Key, old: Arc<T>, new: Arc<T> },
    Deleted { key: Key, old: Arc<T> },
}

type Handler<T> = Box<dyn Fn(&[Event<T>]) + Send + Sync>;

pub(crate) struct Store<T> {
    id: NodeId,
    name: String,
    items: RwLock<BTreeMap<Key, Arc<T>>>,
    synced: AtomicBool,
    handlers: Mutex<Vec<Handler<T>>>,
    // Net changes since the last delivery: the value before the first change
    // and the latest value.
    pending: Mutex<BTreeMap<Key, (Option<Arc<T>>, Option<Arc<T>>)>>,
}

// === impl Collection ===

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<T> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.store.name)
            .field("len", &self.store.items.read().len())
            .finish()
    }
}

impl<T> Collection<T> {
    pub(crate) fn new(store: Arc<Store<T>>) -> Self {
        Self { store }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.store.id
    }

    pub fn name(&self) -> &str {
        &self.store.name
    }

    /// Reads an element without recording a dependency.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.store.get(key)
    }

    /// Reads all elements, ordered by key, without recording a dependency.
    pub fn list(&self) -> Vec<Arc<T>> {
        self.store.items.read().values().cloned().collect()
    }

    pub fn keys(&self) -> BTreeSet<Key> {
        self.store.items.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.store.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.items.read().is_empty()
    }

    pub fn has_synced(&self) -> bool {
        self.store.synced.load(Ordering::Acquire)
    }

    /// Registers a handler invoked with each batch of changes.
    ///
    /// The handler is first invoked with the collection's current contents as
    /// additions. Batches contain the net effect of all changes to a key since
    /// the previous batch and are ordered by key.
    pub fn subscribe(&self, handler: impl Fn(&[Event<T>]) + Send + Sync + 'static) {
        let mut handlers = self.store.handlers.lock();
        let initial = self
            .store
            .items
            .read()
            .iter()
            .map(|(key, new)| Event::Added {
                key: key.clone(),
                new: new.clone(),
            })
            .collect::<Vec<_>>();
        if !initial.is_empty() {
            handler(&initial);
        }
        handlers.push(Box::new(handler));
    }
}

// === impl Event ===

impl<T> Event<T> {
    pub fn key(&self) -> &Key {
        match self {
            Self::Added { key, .. } | Self::Updated { key, .. } | Self::Deleted { key, .. } => {
                key
            }
        }
    }

    /// The value after the change, if the key still exists.
    pub fn latest(&self) -> Option<&Arc<T>> {
        match self {
            Self::Added { new, .. } | Self::Updated { new, .. } => Some(new),
            Self::Deleted { .. } => None,
        }
    }
}

// === impl Store ===

impl<T> Store<T> {
    pub(crate) fn new(id: NodeId, name: String) -> Self {
        Self {
            id,
            name,
            items: RwLock::new(BTreeMap::new()),
            synced: AtomicBool::new(false),
            handlers: Mutex::new(Vec::new()),
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<T>> {
        self.items.read().get(key).cloned()
    }

    pub(crate) fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    pub(crate) fn mark_synced(&self) {
        if !self.synced.swap(true, Ordering::AcqRel) {
            tracing::debug!(collection = %self.name, "Synced");
        }
    }
}

impl<T: Keyed + PartialEq> Store<T> {
    /// Writes a batch of changes, returning the keys whose values changed.
    ///
    /// A change to a value equal to the current value is ignored.
    pub(crate) fn commit(
        &self,
        changes: impl IntoIterator<Item = (Key, Option<Arc<T>>)>,
    ) -> BTreeSet<Key> {
        let mut changed = BTreeSet::new();
        let mut items = self.items.write();
        let mut pending = self.pending.lock();
        for (key, new) in changes {
            let old = items.get(&key).cloned();
            let equal = match (&old, &new) {
                (Some(o), Some(n)) => **o == **n,
                (None, None) => true,
                _ => false,
            };
            if equal {
                continue;
            }

            match &new {
                Some(n) => items.insert(key.clone(), n.clone()),
                None => items.remove(&key),
            };
            pending
                .entry(key.clone())
                .and_modify(|(_, latest)| *latest = new.clone())
                .or_insert((old, new));
            changed.insert(key);
        }
        changed
    }

    /// Publishes the changes committed since the last delivery.
    pub(crate) fn deliver(&self) {
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return;
        }

        let events = pending
            .into_iter()
            .filter_map(|(key, change)| match change {
                (None, Some(new)) => Some(Event::Added { key, new }),
                (Some(old), Some(new)) if *old != *new => {
                    Some(Event::Updated { key, old, new })
                }
                (Some(old), None) => Some(Event::Deleted { key, old }),
                _ => None,
            })
            .collect::<Vec<_>>();
        if events.is_empty() {
            return;
        }

        for handler in self.handlers.lock().iter() {
            handler(&events);
        }
    }
}
