use crate::{collection::Collection, index::Index, runtime::NodeId, Key};
use std::sync::Arc;

/// A dependency recorded while computing an output.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Dep {
    /// Any change to the node.
    All(NodeId),
    /// A change to a single key of the node.
    Key(NodeId, Key),
}

/// Provides transformations with tracked access to other collections.
///
/// Every read records a dependency so that the output being computed is
/// recomputed when what it read changes.
pub struct HandlerContext<'a> {
    deps: &'a mut Vec<Dep>,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(deps: &'a mut Vec<Dep>) -> Self {
        Self { deps }
    }

    /// Reads every element of a collection.
    pub fn fetch<T>(&mut self, collection: &Collection<T>) -> Vec<Arc<T>> {
        self.deps.push(Dep::All(collection.id()));
        collection.list()
    }

    /// Reads a single element of a collection by key.
    pub fn fetch_one<T>(&mut self, collection: &Collection<T>, key: &str) -> Option<Arc<T>> {
        self.deps.push(Dep::Key(collection.id(), Key::from(key)));
        collection.get(key)
    }

    /// Reads the elements of an index's source with the given index key.
    pub fn fetch_index<T>(&mut self, index: &Index<T>, key: &str) -> Vec<Arc<T>> {
        self.deps.push(Dep::Key(index.id(), Key::from(key)));
        index.lookup(key)
    }
}
