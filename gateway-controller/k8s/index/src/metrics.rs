use crate::Sink;
use agentgateway_controller_krt::Keyed;
use kube::{Resource, ResourceExt};
use kubert::index::{
    ClusterRemoved, IndexClusterResource, IndexNamespacedResource, NamespacedRemoved,
};
use parking_lot::RwLock;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::Arc;

/// Counts the watch events fed into the graph's inputs.
#[derive(Clone, Debug)]
pub struct IndexMetrics {
    index_size: Family<IndexLabels, Gauge>,
    index_applies: Family<NamespacedIndexLabels, Counter>,
    index_deletes: Family<NamespacedIndexLabels, Counter>,
    index_resets: Family<IndexLabels, Counter>,
}

/// A sink that records [`IndexMetrics`].
pub struct Instrumented<T> {
    sink: Sink<T>,
    metrics: IndexMetrics,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct NamespacedIndexLabels {
    namespace: String,
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct IndexLabels {
    kind: String,
}

// === impl IndexMetrics ===

impl IndexMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let index_size = Family::default();
        prom.register(
            "index_size",
            "Gauge of the number of resources in the index",
            index_size.clone(),
        );

        let index_applies = Family::default();
        prom.register(
            "index_applies",
            "Count of applies to the index",
            index_applies.clone(),
        );

        let index_deletes = Family::default();
        prom.register(
            "index_deletes",
            "Count of deletes to the index",
            index_deletes.clone(),
        );

        let index_resets = Family::default();
        prom.register(
            "index_resets",
            "Count of resets to the index",
            index_resets.clone(),
        );

        Self {
            index_size,
            index_applies,
            index_deletes,
            index_resets,
        }
    }

    pub fn instrument<T>(&self, sink: Sink<T>) -> Arc<RwLock<Instrumented<T>>> {
        Arc::new(RwLock::new(Instrumented {
            sink,
            metrics: self.clone(),
        }))
    }
}

// === impl Instrumented ===

impl<R> Instrumented<R>
where
    R: Resource<DynamicType = ()> + Keyed + PartialEq + Send + Sync + 'static,
{
    fn update_size(&self) {
        self.metrics
            .index_size
            .get_or_create(&IndexLabels {
                kind: R::kind(&()).to_string(),
            })
            .set(self.sink.size() as i64);
    }
}

impl<R> IndexNamespacedResource<R> for Instrumented<R>
where
    R: Resource<DynamicType = ()> + Keyed + PartialEq + Send + Sync + 'static,
{
    fn apply(&mut self, resource: R) {
        self.metrics
            .index_applies
            .get_or_create(&NamespacedIndexLabels {
                namespace: resource.namespace().unwrap_or_default(),
                kind: R::kind(&()).to_string(),
            })
            .inc();
        IndexNamespacedResource::apply(&mut self.sink, resource);
        self.update_size();
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.metrics
            .index_deletes
            .get_or_create(&NamespacedIndexLabels {
                namespace: namespace.clone(),
                kind: R::kind(&()).to_string(),
            })
            .inc();
        IndexNamespacedResource::delete(&mut self.sink, namespace, name);
        self.update_size();
    }

    fn reset(&mut self, resources: Vec<R>, removed: NamespacedRemoved) {
        self.metrics
            .index_resets
            .get_or_create(&IndexLabels {
                kind: R::kind(&()).to_string(),
            })
            .inc();
        IndexNamespacedResource::reset(&mut self.sink, resources, removed);
        self.update_size();
    }
}

impl<R> IndexClusterResource<R> for Instrumented<R>
where
    R: Resource<DynamicType = ()> + Keyed + PartialEq + Send + Sync + 'static,
{
    fn apply(&mut self, resource: R) {
        self.metrics
            .index_applies
            .get_or_create(&NamespacedIndexLabels {
                namespace: String::new(),
                kind: R::kind(&()).to_string(),
            })
            .inc();
        IndexClusterResource::apply(&mut self.sink, resource);
        self.update_size();
    }

    fn delete(&mut self, name: String) {
        self.metrics
            .index_deletes
            .get_or_create(&NamespacedIndexLabels {
                namespace: String::new(),
                kind: R::kind(&()).to_string(),
            })
            .inc();
        IndexClusterResource::delete(&mut self.sink, name);
        self.update_size();
    }

    fn reset(&mut self, resources: Vec<R>, removed: ClusterRemoved) {
        self.metrics
            .index_resets
            .get_or_create(&IndexLabels {
                kind: R::kind(&()).to_string(),
            })
            .inc();
        IndexClusterResource::reset(&mut self.sink, resources, removed);
        self.update_size();
    }
}
