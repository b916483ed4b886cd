use crate::{AgentSnapshot, SnapshotMetrics};
use ahash::AHashMap as HashMap;
use parking_lot::{Mutex, RwLock};
use std::{collections::BTreeMap, fmt, pin::Pin, sync::Arc};
use tokio::sync::watch;
use tokio_stream::{wrappers::WatchStream, Stream};

/// Stores the current snapshot of every gateway, by node id.
#[derive(Clone, Default)]
pub struct SnapshotCache {
    inner: Arc<Inner>,
}

/// A change to the set of snapshots in a [`SnapshotCache`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotEvent {
    Added(String),
    Updated(String),
    Deleted(String),
}

/// Yields a node's current snapshot and every change to it. `None` is
/// yielded while the node has no snapshot.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Option<Arc<AgentSnapshot>>> + Send + Sync>>;

type Handler = Box<dyn Fn(&[SnapshotEvent]) + Send + Sync>;

#[derive(Default)]
struct Inner {
    snapshots: RwLock<BTreeMap<String, Arc<AgentSnapshot>>>,
    watches: Mutex<HashMap<String, watch::Sender<Option<Arc<AgentSnapshot>>>>>,
    handlers: Mutex<Vec<Handler>>,
    metrics: SnapshotMetrics,
}

// === impl SnapshotCache ===

impl SnapshotCache {
    pub fn new(metrics: SnapshotMetrics) -> Self {
        Self {
            inner: Arc::new(Inner {
                metrics,
                ..Default::default()
            }),
        }
    }

    pub fn set_snapshot(&self, id: impl Into<String>, snapshot: AgentSnapshot) {
        self.update(vec![(id.into(), Some(snapshot))]);
    }

    pub fn clear_snapshot(&self, id: &str) {
        self.update(vec![(id.to_string(), None)]);
    }

    pub fn get_snapshot(&self, id: &str) -> Option<Arc<AgentSnapshot>> {
        self.inner.snapshots.read().get(id).cloned()
    }

    /// Lists the ids of all nodes with a snapshot.
    pub fn get_status_keys(&self) -> Vec<String> {
        self.inner.snapshots.read().keys().cloned().collect()
    }

    /// Sets and clears snapshots, notifying subscribers of the net changes
    /// as a single batch ordered by id.
    ///
    /// A snapshot with the same version as the one it replaces is ignored.
    pub fn update(&self, changes: Vec<(String, Option<AgentSnapshot>)>) {
        let (events, changed, size) = {
            let mut snapshots = self.inner.snapshots.write();
            let mut before = BTreeMap::new();
            for (id, snapshot) in changes {
                let current = snapshots.get(&id);
                before
                    .entry(id.clone())
                    .or_insert_with(|| current.map(|s| version_of(s)));
                match snapshot {
                    Some(new) => {
                        if current.map_or(true, |old| old.version() != new.version()) {
                            snapshots.insert(id, Arc::new(new));
                        }
                    }
                    None => {
                        snapshots.remove(&id);
                    }
                }
            }

            let mut events = Vec::new();
            let mut changed = Vec::new();
            for (id, old) in before {
                let new = snapshots.get(&id);
                let event = match (old, new) {
                    (None, Some(_)) => SnapshotEvent::Added(id.clone()),
                    (Some(old), Some(new)) if old != version_of(new) => {
                        SnapshotEvent::Updated(id.clone())
                    }
                    (Some(_), None) => SnapshotEvent::Deleted(id.clone()),
                    _ => continue,
                };
                tracing::debug!(?event, "Snapshot changed");
                changed.push((id, new.cloned()));
                events.push(event);
            }
            (events, changed, snapshots.len())
        };
        if events.is_empty() {
            return;
        }

        {
            let mut watches = self.inner.watches.lock();
            for (id, snapshot) in changed {
                if let Some(tx) = watches.get(&id) {
                    tx.send_replace(snapshot);
                }
            }
            watches.retain(|_, tx| !tx.is_closed());
        }

        self.inner.metrics.record(&events, size);
        for handler in self.inner.handlers.lock().iter() {
            handler(&events);
        }
    }

    /// Registers a handler invoked with each batch of changes.
    ///
    /// Handlers run synchronously while the batch is applied and must not
    /// block.
    pub fn subscribe(&self, handler: impl Fn(&[SnapshotEvent]) + Send + Sync + 'static) {
        self.inner.handlers.lock().push(Box::new(handler));
    }

    /// Watches the snapshot of a single node.
    pub fn watch_snapshot(&self, id: &str) -> SnapshotStream {
        let mut watches = self.inner.watches.lock();
        let rx = match watches.get(id) {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = watch::channel(self.get_snapshot(id));
                watches.insert(id.to_string(), tx);
                rx
            }
        };
        Box::pin(WatchStream::new(rx))
    }
}

impl fmt::Debug for SnapshotCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotCache")
            .field("snapshots", &self.inner.snapshots.read().len())
            .finish_non_exhaustive()
    }
}

// === impl SnapshotEvent ===

impl SnapshotEvent {
    pub fn id(&self) -> &str {
        match self {
            Self::Added(id) | Self::Updated(id) | Self::Deleted(id) => id,
        }
    }
}

fn version_of(snapshot: &AgentSnapshot) -> (String, String) {
    let (resources, addresses) = snapshot.version();
    (resources.to_string(), addresses.to_string())
}
