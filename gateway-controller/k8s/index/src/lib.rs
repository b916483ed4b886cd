//! Agentgateway translation graph
//!
//! Translates Gateway API resources, policy resources and the objects they
//! reference into the resources served to agentgateway data-plane instances,
//! along with the statuses reported back on every input.
//!
//! The graph is built on the incremental collection runtime. Each stage reads
//! the collections it depends on through a handler context, so an input change
//! recomputes only the outputs that read it:
//!
//! ```text
//! [ GatewayClass ] -> [ Gateway ] -> [ ParentInfo ] <- [ *Route ] -> [ RouteAttachment ]
//!                          |                               |                 |
//!                          +---------- [ GatewayStatus ] <-+-----------------+
//! [ *Policy ] -> [ Contribution ] -> [ merged Policy ]
//! ```
//!
//! Gateway statuses are computed in two steps to avoid a cycle: listeners are
//! compiled without knowledge of routes, routes attach to compiled listeners,
//! and the final gateway status joins attachment counts back in.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod address;
mod attachment;
mod backends;
pub mod gateway;
mod inputs;
mod metrics;
mod policy;
pub mod reference_grant;
mod route;

#[cfg(test)]
mod tests;

pub use self::{
    attachment::RouteAttachment,
    gateway::{GatewayInfo, ListenerInfo, ParentInfo},
    inputs::{Inputs, Sink, Watched},
    metrics::{IndexMetrics, Instrumented},
    reference_grant::ReferenceGrants,
};
use agentgateway_controller_core::{
    agent::Output,
    status::{GatewayClassStatusDraft, GatewayStatusDraft, PolicyStatusDraft, RouteStatusDraft},
    DEFAULT_CONTROLLER_NAME,
};
use agentgateway_controller_k8s_api::{self as k8s, policy as api};
use agentgateway_controller_krt::{Collection, Runtime};
use std::sync::Arc;

/// Settings that influence translation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// The GatewayClass controller name handled by this instance.
    pub controller_name: String,

    /// Gateways of this class are translated as mesh waypoints.
    pub waypoint_class: String,

    /// The DNS suffix of in-cluster service hostnames.
    pub cluster_domain: String,

    /// Qualifies service VIPs in address output.
    pub cluster_id: String,
}

/// The collections produced by the translation graph.
pub struct Outputs {
    /// Every resource destined for data-plane instances.
    pub resources: Collection<Output>,

    pub gateway_class_statuses: Collection<GatewayClassStatusDraft>,
    pub gateway_statuses: Collection<GatewayStatusDraft>,
    pub route_statuses: Collection<RouteStatusDraft>,
    pub policy_statuses: Collection<PolicyStatusDraft>,
}

/// The collections transformations read from while translating an object.
#[derive(Clone)]
pub(crate) struct Lookups {
    pub config: Arc<Config>,
    pub grants: ReferenceGrants,
    pub gateways: Collection<k8s::Gateway>,
    pub http_routes: Collection<k8s::HttpRoute>,
    pub grpc_routes: Collection<k8s::GrpcRoute>,
    pub namespaces: Collection<k8s::Namespace>,
    pub services: Collection<k8s::Service>,
    pub secrets: Collection<k8s::Secret>,
    pub config_maps: Collection<k8s::ConfigMap>,
    pub backends: Collection<k8s::Backend>,
    pub inference_pools: Collection<k8s::InferencePool>,
    pub service_entries: Collection<k8s::ServiceEntry>,
    pub gateway_extensions: Collection<api::GatewayExtension>,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
            waypoint_class: "istio-waypoint".to_string(),
            cluster_domain: "cluster.local".to_string(),
            cluster_id: "cluster1".to_string(),
        }
    }
}

impl Config {
    pub(crate) fn service_hostname(&self, ns: &str, name: &str) -> String {
        format!("{name}.{ns}.svc.{}", self.cluster_domain)
    }
}

/// Builds the translation graph on `rt`, returning the inputs to feed and
/// the outputs to observe.
pub fn build(rt: &Runtime, config: Config) -> (Inputs, Outputs) {
    let inputs = Inputs::new(rt);
    let lookups = Lookups {
        config: Arc::new(config),
        grants: ReferenceGrants::new(rt, &inputs.reference_grants.collection()),
        gateways: inputs.gateways.collection(),
        http_routes: inputs.http_routes.collection(),
        grpc_routes: inputs.grpc_routes.collection(),
        namespaces: inputs.namespaces.collection(),
        services: inputs.services.collection(),
        secrets: inputs.secrets.collection(),
        config_maps: inputs.config_maps.collection(),
        backends: inputs.backends.collection(),
        inference_pools: inputs.inference_pools.collection(),
        service_entries: inputs.service_entries.collection(),
        gateway_extensions: inputs.gateway_extensions.collection(),
    };

    let gateways = gateway::Gateways::build(rt, &lookups, &inputs.gateway_classes.collection());
    let routes = route::Routes::build(rt, &lookups, &gateways, &inputs);
    let attachments = attachment::Attachments::new(rt, &routes.attachments);
    let gateway_statuses = gateways.statuses(rt, &attachments);
    let policies = policy::Policies::build(rt, &lookups, &attachments, &inputs);
    let backends = backends::build(rt, &lookups);
    let addresses = address::build(rt, &lookups);

    let resources = rt.join(
        "outputs",
        vec![
            gateways.resources,
            routes.resources,
            policies.resources,
            backends,
            addresses,
        ],
    );

    let outputs = Outputs {
        resources,
        gateway_class_statuses: gateways.class_statuses,
        gateway_statuses,
        route_statuses: routes.statuses,
        policy_statuses: policies.statuses,
    };
    (inputs, outputs)
}
