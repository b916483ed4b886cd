use crate::{
    collection::Collection,
    runtime::{Node, NodeId, Round},
    Key, Keyed,
};
use ahash::AHashMap as HashMap;
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// A read-only secondary index over a collection.
pub struct Index<T> {
    node: Arc<IndexNode<T>>,
}

type IndexFn<T> = Box<dyn Fn(&T) -> Vec<Key> + Send + Sync + 'static>;

pub(crate) struct IndexNode<T> {
    id: NodeId,
    name: String,
    src: Collection<T>,
    f: IndexFn<T>,
    by_index: RwLock<BTreeMap<Key, BTreeSet<Key>>>,
    // Source key to the index keys it was last filed under.
    filed: Mutex<Option<HashMap<Key, Vec<Key>>>>,
}

// === impl Index ===

impl<T> Clone for Index<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl<T> Index<T> {
    pub(crate) fn new(node: Arc<IndexNode<T>>) -> Self {
        Self { node }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Reads the elements filed under an index key without recording a
    /// dependency.
    pub fn lookup(&self, key: &str) -> Vec<Arc<T>> {
        let keys = match self.node.by_index.read().get(key) {
            Some(keys) => keys.clone(),
            None => return Vec::new(),
        };
        keys.iter()
            .filter_map(|k| self.node.src.get(k.as_str()))
            .collect()
    }
}

// === impl IndexNode ===

impl<T> IndexNode<T> {
    pub(crate) fn new(id: NodeId, name: String, src: Collection<T>, f: IndexFn<T>) -> Self {
        Self {
            id,
            name,
            src,
            f,
            by_index: RwLock::new(BTreeMap::new()),
            filed: Mutex::new(None),
        }
    }
}

impl<T> Node for IndexNode<T>
where
    T: Keyed + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, round: &Round) -> BTreeSet<Key> {
        let mut filed = self.filed.lock();
        let dirty = match *filed {
            Some(_) => round.changed(self.src.id()).cloned().unwrap_or_default(),
            None => self.src.keys(),
        };
        let filed = filed.get_or_insert_with(HashMap::new);

        let mut changed = BTreeSet::new();
        let mut by_index = self.by_index.write();
        for key in dirty {
            for idx in filed.remove(&key).unwrap_or_default() {
                if let Some(keys) = by_index.get_mut(&idx) {
                    keys.remove(&key);
                    if keys.is_empty() {
                        by_index.remove(&idx);
                    }
                }
                changed.insert(idx);
            }

            if let Some(item) = self.src.get(key.as_str()) {
                let mut idxs = (self.f)(&item);
                idxs.sort();
                idxs.dedup();
                for idx in &idxs {
                    by_index.entry(idx.clone()).or_default().insert(key.clone());
                    changed.insert(idx.clone());
                }
                filed.insert(key, idxs);
            }
        }
        changed
    }

    fn deliver(&self) {}

    fn has_synced(&self) -> bool {
        self.src.has_synced()
    }
}
