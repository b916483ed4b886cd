use crate::{
    collection::{Collection, Store},
    runtime::{Node, NodeId, Round},
    Key, Keyed,
};
use parking_lot::Mutex;
use std::{collections::BTreeSet, sync::Arc};
use tokio::sync::Notify;

/// A collection whose contents are provided from outside the graph.
///
/// Changes are queued and take effect on the next flush of the runtime.
pub struct Input<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    store: Arc<Store<T>>,
    queue: Mutex<Vec<Op<T>>>,
    notify: Arc<Notify>,
}

enum Op<T> {
    Apply(T),
    Delete(Key),
    Reset(Vec<T>),
    Synced,
}

// === impl Input ===

impl<T> Clone for Input<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Input<T>
where
    T: Keyed + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new(store: Arc<Store<T>>, notify: Arc<Notify>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                queue: Mutex::new(Vec::new()),
                notify,
            }),
        }
    }

    pub fn collection(&self) -> Collection<T> {
        Collection::new(self.inner.store.clone())
    }

    /// Creates or replaces an object.
    pub fn apply(&self, obj: T) {
        self.push(Op::Apply(obj));
    }

    pub fn delete(&self, key: impl Into<Key>) {
        self.push(Op::Delete(key.into()));
    }

    /// Replaces the collection's contents and marks it synced.
    pub fn reset(&self, objs: Vec<T>) {
        self.push(Op::Reset(objs));
    }

    /// Marks the collection as having received its initial state.
    pub fn mark_synced(&self) {
        self.push(Op::Synced);
    }

    fn push(&self, op: Op<T>) {
        self.inner.queue.lock().push(op);
        self.inner.notify.notify_one();
    }
}

impl<T> Node for Input<T>
where
    T: Keyed + PartialEq + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.inner.store.id()
    }

    fn name(&self) -> &str {
        self.inner.store.name()
    }

    fn process(&self, _: &Round) -> BTreeSet<Key> {
        let ops = std::mem::take(&mut *self.inner.queue.lock());
        let store = &self.inner.store;

        let mut changed = BTreeSet::new();
        for op in ops {
            match op {
                Op::Apply(obj) => {
                    changed.extend(store.commit(Some((obj.key(), Some(Arc::new(obj))))));
                }
                Op::Delete(key) => {
                    changed.extend(store.commit(Some((key, None))));
                }
                Op::Reset(objs) => {
                    let mut stale = Collection::new(store.clone()).keys();
                    let mut changes = Vec::with_capacity(objs.len() + stale.len());
                    for obj in objs {
                        let key = obj.key();
                        stale.remove(&key);
                        changes.push((key, Some(Arc::new(obj))));
                    }
                    changes.extend(stale.into_iter().map(|k| (k, None)));
                    changed.extend(store.commit(changes));
                    store.mark_synced();
                }
                Op::Synced => store.mark_synced(),
            }
        }
        changed
    }

    fn deliver(&self) {
        self.inner.store.deliver();
    }

    fn has_synced(&self) -> bool {
        self.inner.store.has_synced()
    }
}
