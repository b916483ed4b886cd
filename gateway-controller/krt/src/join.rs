use crate::{
    collection::{Collection, Store},
    runtime::{Node, NodeId, Round},
    Key, Keyed,
};
use std::{collections::BTreeSet, sync::Arc};

/// The union of collections with disjoint keys.
pub(crate) struct Join<T> {
    sources: Vec<Collection<T>>,
    out: Arc<Store<T>>,
    initialized: parking_lot::Mutex<bool>,
}

impl<T> Join<T>
where
    T: Keyed + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new(sources: Vec<Collection<T>>, out: Arc<Store<T>>) -> Self {
        Self {
            sources,
            out,
            initialized: parking_lot::Mutex::new(false),
        }
    }
}

impl<T> Node for Join<T>
where
    T: Keyed + PartialEq + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.out.id()
    }

    fn name(&self) -> &str {
        self.out.name()
    }

    fn process(&self, round: &Round) -> BTreeSet<Key> {
        let mut dirty = BTreeSet::new();
        let mut initialized = self.initialized.lock();
        for src in &self.sources {
            if !*initialized {
                dirty.extend(src.keys());
            } else if let Some(keys) = round.changed(src.id()) {
                dirty.extend(keys.iter().cloned());
            }
        }
        *initialized = true;
        drop(initialized);

        let changes = dirty.into_iter().map(|key| {
            let mut found = self
                .sources
                .iter()
                .filter_map(|src| src.get(key.as_str()).map(|v| (src.name(), v)));
            let value = found.next().map(|(_, v)| v);
            if let Some((other, _)) = found.next() {
                tracing::warn!(
                    collection = %self.out.name(),
                    %key,
                    %other,
                    "Key present in multiple joined collections"
                );
            }
            (key, value)
        });
        let changed = self.out.commit(changes.collect::<Vec<_>>());

        if self.sources.iter().all(|s| s.has_synced()) {
            self.out.mark_synced();
        }
        changed
    }

    fn deliver(&self) {
        self.out.deliver();
    }

    fn has_synced(&self) -> bool {
        self.out.has_synced()
    }
}
