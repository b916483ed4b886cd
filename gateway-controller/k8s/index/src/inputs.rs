use agentgateway_controller_k8s_api::{self as k8s, policy as api};
use agentgateway_controller_krt::{Input, Keyed, Runtime};
use kubert::index::{
    ClusterRemoved, IndexClusterResource, IndexNamespacedResource, NamespacedRemoved,
};
use parking_lot::RwLock;
use std::sync::Arc;

/// The input collections of the translation graph, fed by cluster watches.
#[derive(Clone)]
pub struct Inputs {
    pub gateway_classes: Input<k8s::GatewayClass>,
    pub gateways: Input<k8s::Gateway>,
    pub http_routes: Input<k8s::HttpRoute>,
    pub grpc_routes: Input<k8s::GrpcRoute>,
    pub tcp_routes: Input<k8s::TcpRoute>,
    pub tls_routes: Input<k8s::TlsRoute>,
    pub reference_grants: Input<k8s::ReferenceGrant>,
    pub namespaces: Input<k8s::Namespace>,
    pub services: Input<k8s::Service>,
    pub secrets: Input<k8s::Secret>,
    pub config_maps: Input<k8s::ConfigMap>,
    pub backends: Input<k8s::Backend>,
    pub inference_pools: Input<k8s::InferencePool>,
    pub service_entries: Input<k8s::ServiceEntry>,
    pub traffic_policies: Input<api::TrafficPolicy>,
    pub listener_policies: Input<api::HttpListenerPolicy>,
    pub backend_tls_policies: Input<api::BackendTlsPolicy>,
    pub agentgateway_policies: Input<api::AgentgatewayPolicy>,
    pub gateway_extensions: Input<api::GatewayExtension>,
}

/// Feeds watch events for a resource into an input collection.
pub struct Sink<T> {
    input: Input<T>,
}

// === impl Inputs ===

impl Inputs {
    pub(crate) fn new(rt: &Runtime) -> Self {
        Self {
            gateway_classes: rt.input("gatewayclasses"),
            gateways: rt.input("gateways"),
            http_routes: rt.input("httproutes"),
            grpc_routes: rt.input("grpcroutes"),
            tcp_routes: rt.input("tcproutes"),
            tls_routes: rt.input("tlsroutes"),
            reference_grants: rt.input("referencegrants"),
            namespaces: rt.input("namespaces"),
            services: rt.input("services"),
            secrets: rt.input("secrets"),
            config_maps: rt.input("configmaps"),
            backends: rt.input("backends"),
            inference_pools: rt.input("inferencepools"),
            service_entries: rt.input("serviceentries"),
            traffic_policies: rt.input("trafficpolicies"),
            listener_policies: rt.input("httplistenerpolicies"),
            backend_tls_policies: rt.input("backendtlspolicies"),
            agentgateway_policies: rt.input("agentgatewaypolicies"),
            gateway_extensions: rt.input("gatewayextensions"),
        }
    }

    /// Marks inputs that are not watched as synced so that the graph can
    /// report readiness without them.
    pub fn mark_unwatched_synced(&self, watched: &Watched) {
        if !watched.grpc_routes {
            self.grpc_routes.mark_synced();
        }
        if !watched.tcp_routes {
            self.tcp_routes.mark_synced();
        }
        if !watched.tls_routes {
            self.tls_routes.mark_synced();
        }
        if !watched.inference_pools {
            self.inference_pools.mark_synced();
        }
        if !watched.service_entries {
            self.service_entries.mark_synced();
        }
    }
}

/// Optional resource kinds that are only watched when their CRDs are
/// installed.
#[derive(Clone, Debug, Default)]
pub struct Watched {
    pub grpc_routes: bool,
    pub tcp_routes: bool,
    pub tls_routes: bool,
    pub inference_pools: bool,
    pub service_entries: bool,
}

// === impl Sink ===

impl<T> Sink<T>
where
    T: Keyed + PartialEq + Send + Sync + 'static,
{
    pub fn new(input: Input<T>) -> Self {
        Self { input }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }

    /// The number of objects currently held by the input.
    pub fn size(&self) -> usize {
        self.input.collection().len()
    }
}

impl<T> IndexNamespacedResource<T> for Sink<T>
where
    T: Keyed + PartialEq + Send + Sync + 'static,
{
    fn apply(&mut self, resource: T) {
        self.input.apply(resource);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.input.delete(format!("{namespace}/{name}"));
    }

    fn reset(&mut self, resources: Vec<T>, _removed: NamespacedRemoved) {
        // Objects missing from `resources` are removed by the input itself.
        self.input.reset(resources);
    }
}

impl<T> IndexClusterResource<T> for Sink<T>
where
    T: Keyed + PartialEq + Send + Sync + 'static,
{
    fn apply(&mut self, resource: T) {
        self.input.apply(resource);
    }

    fn delete(&mut self, name: String) {
        self.input.delete(name);
    }

    fn reset(&mut self, resources: Vec<T>, _removed: ClusterRemoved) {
        self.input.reset(resources);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(ns: &str, name: &str) -> k8s::Service {
        k8s::Service {
            metadata: k8s::ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn namespace(name: &str) -> k8s::Namespace {
        k8s::Namespace {
            metadata: k8s::ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn namespaced_events() {
        let rt = Runtime::default();
        let input = rt.input::<k8s::Service>("services");
        let mut sink = Sink::new(input.clone());

        IndexNamespacedResource::apply(&mut sink, service("ns", "a"));
        IndexNamespacedResource::apply(&mut sink, service("ns", "b"));
        rt.flush();
        assert_eq!(sink.size(), 2);
        assert!(!input.collection().has_synced());

        IndexNamespacedResource::delete(&mut sink, "ns".to_string(), "a".to_string());
        rt.flush();
        assert!(input.collection().get("ns/a").is_none());

        IndexNamespacedResource::reset(
            &mut sink,
            vec![service("ns", "c")],
            NamespacedRemoved::default(),
        );
        rt.flush();
        assert_eq!(sink.size(), 1);
        assert!(input.collection().get("ns/c").is_some());
        assert!(input.collection().has_synced());
    }

    #[test]
    fn cluster_events() {
        let rt = Runtime::default();
        let input = rt.input::<k8s::Namespace>("namespaces");
        let mut sink = Sink::new(input.clone());

        IndexClusterResource::apply(&mut sink, namespace("a"));
        IndexClusterResource::reset(&mut sink, vec![namespace("b")], ClusterRemoved::default());
        rt.flush();
        assert!(input.collection().get("a").is_none());
        assert!(input.collection().get("b").is_some());

        IndexClusterResource::delete(&mut sink, "b".to_string());
        rt.flush();
        assert!(input.collection().is_empty());
    }
}
