use crate::{
    collection::{Collection, Store},
    context::HandlerContext,
    derived::{Derivation, Derived},
    index::{Index, IndexNode},
    input::Input,
    join::Join,
    metrics::RuntimeMetrics,
    protected::RecomputeProtected,
    Key, Keyed,
};
use ahash::AHashMap as HashMap;
use parking_lot::{Mutex, RwLock};
use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::Notify;

/// Drives a graph of collections.
///
/// Cloning a runtime produces a new handle to the same graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

pub(crate) type NodeId = usize;

/// A vertex in the collection graph.
pub(crate) trait Node: Send + Sync {
    fn id(&self) -> NodeId;

    fn name(&self) -> &str;

    /// Brings the node up to date with the changes made by its upstream nodes
    /// in this round, returning the keys whose values changed.
    fn process(&self, round: &Round) -> BTreeSet<Key>;

    /// Publishes the changes committed in this round to subscribers.
    fn deliver(&self);

    fn has_synced(&self) -> bool;
}

/// The keys changed by each node during a single flush.
#[derive(Default)]
pub(crate) struct Round {
    changed: HashMap<NodeId, BTreeSet<Key>>,
}

struct Inner {
    nodes: RwLock<Vec<Arc<dyn Node>>>,
    next_id: AtomicUsize,
    notify: Arc<Notify>,
    flushing: Mutex<()>,
    stopped: AtomicBool,
    metrics: Option<RuntimeMetrics>,
}

// === impl Runtime ===

impl Default for Runtime {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Runtime {
    pub fn new(metrics: Option<RuntimeMetrics>) -> Self {
        Self {
            inner: Arc::new(Inner {
                nodes: RwLock::new(Vec::new()),
                next_id: AtomicUsize::new(0),
                notify: Arc::new(Notify::new()),
                flushing: Mutex::new(()),
                stopped: AtomicBool::new(false),
                metrics,
            }),
        }
    }

    /// Creates a collection fed by an external provider.
    pub fn input<T>(&self, name: impl Into<String>) -> Input<T>
    where
        T: Keyed + PartialEq + Send + Sync + 'static,
    {
        let store = Arc::new(Store::new(self.next_id(), name.into()));
        let input = Input::new(store, self.inner.notify.clone());
        self.register(Arc::new(input.clone()));
        input
    }

    /// Derives at most one output from each element of `src`.
    pub fn map<S, U, F>(&self, name: impl Into<String>, src: &Collection<S>, f: F) -> Collection<U>
    where
        S: Keyed + Send + Sync + 'static,
        U: Keyed + PartialEq + Send + Sync + 'static,
        F: Fn(&mut HandlerContext<'_>, &S) -> Option<U> + Send + Sync + 'static,
    {
        self.flat_map(name, src, move |ctx, s| f(ctx, s).into_iter().collect())
    }

    /// Derives any number of outputs from each element of `src`.
    ///
    /// When two source elements produce the same output key, the output of the
    /// source with the lowest key is used and a warning is logged.
    pub fn flat_map<S, U, F>(
        &self,
        name: impl Into<String>,
        src: &Collection<S>,
        f: F,
    ) -> Collection<U>
    where
        S: Keyed + Send + Sync + 'static,
        U: Keyed + PartialEq + Send + Sync + 'static,
        F: Fn(&mut HandlerContext<'_>, &S) -> Vec<U> + Send + Sync + 'static,
    {
        let store = Arc::new(Store::new(self.next_id(), name.into()));
        let node = Derived::new(src.clone(), store.clone(), Box::new(f));
        self.register(Arc::new(node));
        Collection::new(store)
    }

    /// Derives a status and any number of outputs from each element of `src`.
    ///
    /// Statuses are keyed by the status type and are collected separately from
    /// the outputs so that they may be written back to the source objects.
    pub fn status<S, St, U, F>(
        &self,
        name: impl Into<String>,
        src: &Collection<S>,
        f: F,
    ) -> (Collection<St>, Collection<U>)
    where
        S: Keyed + Send + Sync + 'static,
        St: Keyed + PartialEq + Clone + Send + Sync + 'static,
        U: Keyed + PartialEq + Clone + Send + Sync + 'static,
        F: Fn(&mut HandlerContext<'_>, &S) -> (Option<St>, Vec<U>) + Send + Sync + 'static,
    {
        let name = name.into();
        let derivations = self.map(format!("{name}/derivation"), src, move |ctx, s: &S| {
            let (status, outputs) = f(ctx, s);
            Some(Derivation {
                key: s.key(),
                status,
                outputs,
            })
        });
        let statuses = self.map(
            format!("{name}/status"),
            &derivations,
            |_, d: &Derivation<St, U>| d.status.clone(),
        );
        let outputs = self.flat_map(name, &derivations, |_, d: &Derivation<St, U>| {
            d.outputs.clone()
        });
        (statuses, outputs)
    }

    /// Merges collections whose keys are disjoint. If a key is present in more
    /// than one collection, the earliest collection in `sources` wins.
    pub fn join<T>(&self, name: impl Into<String>, sources: Vec<Collection<T>>) -> Collection<T>
    where
        T: Keyed + PartialEq + Send + Sync + 'static,
    {
        let store = Arc::new(Store::new(self.next_id(), name.into()));
        let node = Join::new(sources, store.clone());
        self.register(Arc::new(node));
        Collection::new(store)
    }

    /// Indexes a collection by zero or more derived keys per element.
    pub fn index<T, F>(&self, name: impl Into<String>, src: &Collection<T>, f: F) -> Index<T>
    where
        T: Keyed + Send + Sync + 'static,
        F: Fn(&T) -> Vec<Key> + Send + Sync + 'static,
    {
        let node = Arc::new(IndexNode::new(
            self.next_id(),
            name.into(),
            src.clone(),
            Box::new(f),
        ));
        self.register(node.clone());
        Index::new(node)
    }

    /// Wraps a value that is updated outside of the graph. Readers depend on
    /// the value only when reading it through [`RecomputeProtected::get`], and
    /// are recomputed only when [`RecomputeProtected::mark_dirty`] is called.
    pub fn recompute_protected<T>(&self, name: impl Into<String>, value: T) -> RecomputeProtected<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        RecomputeProtected::new(value, self.input(name))
    }

    /// Returns true once every collection in the graph has synced.
    pub fn has_synced(&self) -> bool {
        self.inner.nodes.read().iter().all(|n| n.has_synced())
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Processes all pending input changes through the graph and delivers the
    /// resulting events to subscribers.
    ///
    /// Subscribers are invoked on the calling thread and must not call `flush`.
    pub fn flush(&self) {
        if self.is_stopped() {
            return;
        }
        let _flushing = self.inner.flushing.lock();
        let nodes = self.inner.nodes.read().clone();

        let mut round = Round::default();
        let mut total = 0;
        for node in &nodes {
            let changed = node.process(&round);
            if !changed.is_empty() {
                tracing::trace!(node = %node.name(), changed = changed.len(), "Processed");
                total += changed.len();
                round.changed.insert(node.id(), changed);
            }
        }

        for node in &nodes {
            node.deliver();
        }

        if let Some(metrics) = &self.inner.metrics {
            metrics.flushes.inc();
            metrics.changed_keys.inc_by(total as u64);
        }
    }

    /// Flushes the graph whenever an input changes, until shutdown.
    ///
    /// Changes queued before shutdown is signaled are flushed before returning.
    pub async fn run(self, shutdown: drain::Watch) {
        let signaled = shutdown.signaled();
        tokio::pin!(signaled);
        loop {
            tokio::select! {
                biased;
                release = &mut signaled => {
                    self.flush();
                    self.inner.stopped.store(true, Ordering::Release);
                    tracing::debug!("Collection runtime stopped");
                    drop(release);
                    return;
                }
                _ = self.inner.notify.notified() => {
                    self.flush();
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    fn next_id(&self) -> NodeId {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn register(&self, node: Arc<dyn Node>) {
        tracing::debug!(id = node.id(), name = %node.name(), "Registered collection");
        self.inner.nodes.write().push(node);
        self.inner.notify.notify_one();
    }
}

// === impl Round ===

impl Round {
    pub(crate) fn changed(&self, id: NodeId) -> Option<&BTreeSet<Key>> {
        self.changed.get(&id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&NodeId, &BTreeSet<Key>)> {
        self.changed.iter()
    }
}
