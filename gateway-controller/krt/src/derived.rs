use crate::{
    collection::{Collection, Store},
    context::{Dep, HandlerContext},
    runtime::{Node, NodeId, Round},
    Key, Keyed,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::Mutex;
use std::{collections::BTreeSet, sync::Arc};

pub(crate) type Transform<S, U> =
    Box<dyn Fn(&mut HandlerContext<'_>, &S) -> Vec<U> + Send + Sync + 'static>;

/// A collection computed from each element of a source collection.
pub(crate) struct Derived<S, U> {
    src: Collection<S>,
    out: Arc<Store<U>>,
    f: Transform<S, U>,
    state: Mutex<State<U>>,
}

/// The result of a status transformation for one source element.
#[derive(PartialEq)]
pub(crate) struct Derivation<St, U> {
    pub(crate) key: Key,
    pub(crate) status: Option<St>,
    pub(crate) outputs: Vec<U>,
}

struct State<U> {
    initialized: bool,
    /// Outputs produced by each source key.
    produced: HashMap<Key, Vec<(Key, Arc<U>)>>,
    /// Source keys producing each output key.
    owners: HashMap<Key, BTreeSet<Key>>,
    deps: HashMap<Key, Vec<Dep>>,
    dependents: HashMap<Dep, HashSet<Key>>,
}

// === impl Derived ===

impl<S, U> Derived<S, U>
where
    S: Keyed + Send + Sync + 'static,
    U: Keyed + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new(src: Collection<S>, out: Arc<Store<U>>, f: Transform<S, U>) -> Self {
        Self {
            src,
            out,
            f,
            state: Mutex::new(State {
                initialized: false,
                produced: HashMap::new(),
                owners: HashMap::new(),
                deps: HashMap::new(),
                dependents: HashMap::new(),
            }),
        }
    }

    /// Source keys that must be recomputed in this round.
    fn dirty(&self, state: &mut State<U>, round: &Round) -> BTreeSet<Key> {
        if !state.initialized {
            state.initialized = true;
            let mut keys = self.src.keys();
            keys.extend(state.produced.keys().cloned());
            return keys;
        }

        let mut dirty = round.changed(self.src.id()).cloned().unwrap_or_default();
        for (id, keys) in round.iter() {
            if let Some(dependents) = state.dependents.get(&Dep::All(*id)) {
                dirty.extend(dependents.iter().cloned());
            }
            for key in keys {
                if let Some(dependents) = state.dependents.get(&Dep::Key(*id, key.clone())) {
                    dirty.extend(dependents.iter().cloned());
                }
            }
        }
        dirty
    }

    fn compute(&self, key: &Key) -> (Vec<Dep>, Vec<(Key, Arc<U>)>) {
        let mut deps = Vec::new();
        let Some(item) = self.src.get(key.as_str()) else {
            return (deps, Vec::new());
        };

        let outputs = {
            let mut ctx = HandlerContext::new(&mut deps);
            (self.f)(&mut ctx, &item)
        };

        let mut produced = Vec::with_capacity(outputs.len());
        for output in outputs {
            let out_key = output.key();
            if produced.iter().any(|(k, _)| *k == out_key) {
                tracing::warn!(collection = %self.out.name(), source = %key, key = %out_key, "Duplicate output key");
                continue;
            }
            produced.push((out_key, Arc::new(output)));
        }
        (deps, produced)
    }
}

impl<S, U> Node for Derived<S, U>
where
    S: Keyed + Send + Sync + 'static,
    U: Keyed + PartialEq + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.out.id()
    }

    fn name(&self) -> &str {
        self.out.name()
    }

    fn process(&self, round: &Round) -> BTreeSet<Key> {
        let mut state = self.state.lock();
        let dirty = self.dirty(&mut state, round);

        let mut touched = BTreeSet::new();
        for key in dirty {
            state.unregister(&key);
            let (deps, outputs) = self.compute(&key);
            state.register(&key, deps);

            for (out_key, _) in state.produced.remove(&key).unwrap_or_default() {
                if let Some(owners) = state.owners.get_mut(&out_key) {
                    owners.remove(&key);
                    if owners.is_empty() {
                        state.owners.remove(&out_key);
                    }
                }
                touched.insert(out_key);
            }
            for (out_key, _) in &outputs {
                state
                    .owners
                    .entry(out_key.clone())
                    .or_default()
                    .insert(key.clone());
                touched.insert(out_key.clone());
            }
            if !outputs.is_empty() {
                state.produced.insert(key, outputs);
            }
        }

        let changes = touched
            .into_iter()
            .map(|out_key| {
                let value = state.winner(&out_key, self.out.name());
                (out_key, value)
            })
            .collect::<Vec<_>>();
        drop(state);

        let changed = self.out.commit(changes);
        if self.src.has_synced() {
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

// === impl State ===

impl<U> State<U> {
    fn register(&mut self, key: &Key, deps: Vec<Dep>) {
        if deps.is_empty() {
            return;
        }
        for dep in &deps {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .insert(key.clone());
        }
        self.deps.insert(key.clone(), deps);
    }

    fn unregister(&mut self, key: &Key) {
        for dep in self.deps.remove(key).unwrap_or_default() {
            if let Some(dependents) = self.dependents.get_mut(&dep) {
                dependents.remove(key);
                if dependents.is_empty() {
                    self.dependents.remove(&dep);
                }
            }
        }
    }

    /// The value for an output key, taken from the lowest source key that
    /// produces it.
    fn winner(&self, out_key: &Key, collection: &str) -> Option<Arc<U>> {
        let owners = self.owners.get(out_key)?;
        if owners.len() > 1 {
            tracing::warn!(%collection, key = %out_key, sources = ?owners, "Output key produced by multiple sources");
        }
        let owner = owners.iter().next()?;
        self.produced
            .get(owner)?
            .iter()
            .find(|(k, _)| k == out_key)
            .map(|(_, v)| v.clone())
    }
}

// === impl Derivation ===

impl<St, U> Keyed for Derivation<St, U> {
    fn key(&self) -> Key {
        self.key.clone()
    }
}
