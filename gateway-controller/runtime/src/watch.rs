use crate::{
    index::{IndexMetrics, Sink},
    k8s::{Client, Resource},
    krt::{Input, Keyed, Runtime},
    snapshot::{parse_node_id, SnapshotCache, SnapshotEvent},
};
use kube::runtime::watcher;
use serde::de::DeserializeOwned;
use std::fmt;
use tokio::time;
use tracing::{info_span, Instrument};

const SYNC_POLL_INTERVAL: time::Duration = time::Duration::from_millis(100);

/// Feeds a watch on all objects of a namespaced kind into `input`.
pub(crate) fn namespaced<T, S: 'static>(
    runtime: &mut kubert::Runtime<S>,
    metrics: &IndexMetrics,
    input: Input<T>,
    name: &'static str,
) where
    T: Resource<DynamicType = ()> + DeserializeOwned + Keyed + PartialEq,
    T: Clone + fmt::Debug + Send + Sync + 'static,
{
    let events = runtime.watch_all::<T>(watcher::Config::default());
    tokio::spawn(
        kubert::index::namespaced(metrics.instrument(Sink::new(input)), events)
            .instrument(info_span!("watch", kind = name)),
    );
}

/// Feeds a watch on all objects of a cluster-scoped kind into `input`.
pub(crate) fn cluster<T, S: 'static>(
    runtime: &mut kubert::Runtime<S>,
    metrics: &IndexMetrics,
    input: Input<T>,
    name: &'static str,
) where
    T: Resource<DynamicType = ()> + DeserializeOwned + Keyed + PartialEq,
    T: Clone + fmt::Debug + Send + Sync + 'static,
{
    let events = runtime.watch_all::<T>(watcher::Config::default());
    tokio::spawn(
        kubert::index::cluster(metrics.instrument(Sink::new(input)), events)
            .instrument(info_span!("watch", kind = name)),
    );
}

/// Returns true if the API server serves `T`.
pub(crate) async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}

/// Waits until every collection in the graph has received its initial
/// state, or until shutdown. Returns false if shutdown was signaled first.
pub(crate) async fn synced(rt: &Runtime, shutdown: drain::Watch) -> bool {
    let signaled = shutdown.signaled();
    tokio::pin!(signaled);
    let mut interval = time::interval(SYNC_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = &mut signaled => return false,
            _ = interval.tick() => {
                if rt.has_synced() {
                    return true;
                }
            }
        }
    }
}

/// Logs gateways as their snapshots come and go.
pub(crate) fn log_snapshots(cache: &SnapshotCache) {
    cache.subscribe(|events| {
        for event in events {
            let gateway = match parse_node_id(event.id()) {
                Some(gw) => gw,
                None => continue,
            };
            match event {
                SnapshotEvent::Added(_) => tracing::info!(%gateway, "Snapshot published"),
                SnapshotEvent::Updated(_) => tracing::debug!(%gateway, "Snapshot updated"),
                SnapshotEvent::Deleted(_) => tracing::info!(%gateway, "Snapshot removed"),
            }
        }
    });
}
