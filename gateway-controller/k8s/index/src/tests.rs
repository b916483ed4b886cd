use super::*;
use agentgateway_controller_core::{
    agent::{AgentResource, Route},
    status::{ConditionDraft, ParentStatusDraft},
    GroupKind, ObjectSource,
};
use agentgateway_controller_k8s_api::{
    gateway::{AllowedRoutes, FromNamespaces, GatewayClassSpec, GatewaySpec, Listener, RouteNamespaces},
    httproute::{HttpBackendRef, HttpPathMatch, HttpRouteMatch, HttpRouteRule, HttpRouteSpec},
    route::{BackendObjectReference, ParentReference},
    ObjectMeta,
};
use agentgateway_controller_krt::{Keyed, Runtime};
use std::sync::Arc;

mod gateways;
mod policies;

pub(crate) const CLASS: &str = "agentgateway";

struct TestConfig {
    rt: Runtime,
    inputs: Inputs,
    outputs: Outputs,
}

// === impl TestConfig ===

impl TestConfig {
    fn new() -> Self {
        let rt = Runtime::default();
        let (inputs, outputs) = build(&rt, Config::default());
        inputs
            .gateway_classes
            .apply(mk_gateway_class(CLASS, DEFAULT_CONTROLLER_NAME));
        Self {
            rt,
            inputs,
            outputs,
        }
    }

    fn flush(&self) {
        self.rt.flush();
    }

    fn resources(&self) -> Vec<Arc<Output>> {
        self.outputs.resources.list()
    }

    fn resource_keys(&self) -> Vec<String> {
        self.outputs
            .resources
            .keys()
            .iter()
            .map(|k| k.as_str().to_string())
            .collect()
    }

    /// Agent routes, sorted by key.
    fn routes(&self) -> Vec<Route> {
        let mut routes = self
            .resources()
            .iter()
            .filter_map(|o| match &**o {
                Output::Resource {
                    resource: AgentResource::Route(r),
                    ..
                } => Some(r.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();
        routes.sort_by(|a, b| a.key.cmp(&b.key));
        routes
    }

    fn gateway_status(&self, ns: &str, name: &str) -> Arc<GatewayStatusDraft> {
        self.outputs
            .gateway_statuses
            .get(&format!("{ns}/{name}"))
            .expect("gateway status must exist")
    }

    fn route_status(&self, kind: GroupKind, ns: &str, name: &str) -> Arc<RouteStatusDraft> {
        let key = ObjectSource::new(kind, Some(ns.to_string()), name).key();
        self.outputs
            .route_statuses
            .get(key.as_str())
            .expect("route status must exist")
    }

    fn http_route_parent(&self, ns: &str, name: &str) -> ParentStatusDraft {
        let status = self.route_status(GroupKind::HTTP_ROUTE, ns, name);
        assert_eq!(status.parents.len(), 1, "expected a single parent");
        status.parents[0].clone()
    }

    fn policy_status(&self, kind: GroupKind, ns: &str, name: &str) -> Arc<PolicyStatusDraft> {
        let key = ObjectSource::new(kind, Some(ns.to_string()), name).key();
        self.outputs
            .policy_statuses
            .get(key.as_str())
            .expect("policy status must exist")
    }
}

/// Asserts that a condition of the given type has the given status and
/// reason.
#[track_caller]
fn assert_condition(conditions: &[ConditionDraft], type_: &str, status: bool, reason: &str) {
    let c = agentgateway_controller_core::status::find(conditions, type_)
        .unwrap_or_else(|| panic!("missing {type_} condition in {conditions:?}"));
    assert_eq!(
        (c.status, c.reason.as_str()),
        (status, reason),
        "unexpected {type_} condition: {c:?}"
    );
}

pub(crate) fn mk_meta(ns: impl ToString, name: impl ToString) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(ns.to_string()),
        name: Some(name.to_string()),
        generation: Some(1),
        ..Default::default()
    }
}

pub(crate) fn mk_gateway_class(name: &str, controller: &str) -> k8s::GatewayClass {
    k8s::GatewayClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: GatewayClassSpec {
            controller_name: controller.to_string(),
            description: None,
        },
        status: None,
    }
}

pub(crate) fn mk_gateway(
    ns: &str,
    name: &str,
    class: &str,
    listeners: Vec<Listener>,
) -> k8s::Gateway {
    k8s::Gateway {
        metadata: mk_meta(ns, name),
        spec: GatewaySpec {
            gateway_class_name: class.to_string(),
            listeners,
        },
        status: None,
    }
}

/// A listener accepting routes from every namespace.
pub(crate) fn mk_listener(name: &str, port: i32, protocol: &str) -> Listener {
    Listener {
        name: name.to_string(),
        hostname: None,
        port,
        protocol: protocol.to_string(),
        tls: None,
        allowed_routes: Some(AllowedRoutes {
            namespaces: Some(RouteNamespaces {
                from: Some(FromNamespaces::All),
                selector: None,
            }),
            kinds: vec![],
        }),
    }
}

pub(crate) fn mk_parent(ns: &str, gateway: &str, section: Option<&str>) -> ParentReference {
    ParentReference {
        namespace: Some(ns.to_string()),
        name: gateway.to_string(),
        section_name: section.map(Into::into),
        ..Default::default()
    }
}

pub(crate) fn mk_backend(ns: Option<&str>, name: &str, port: i32) -> HttpBackendRef {
    HttpBackendRef {
        backend: BackendObjectReference {
            name: name.to_string(),
            namespace: ns.map(Into::into),
            port: Some(port),
            ..Default::default()
        },
        weight: None,
        filters: vec![],
    }
}

pub(crate) fn path_prefix(path: &str) -> HttpRouteMatch {
    HttpRouteMatch {
        path: Some(HttpPathMatch {
            type_: Some("PathPrefix".to_string()),
            value: Some(path.to_string()),
        }),
        ..Default::default()
    }
}

pub(crate) fn mk_rule(matches: Vec<HttpRouteMatch>, backends: Vec<HttpBackendRef>) -> HttpRouteRule {
    HttpRouteRule {
        matches,
        backend_refs: backends,
        ..Default::default()
    }
}

pub(crate) fn mk_http_route(
    ns: &str,
    name: &str,
    hostnames: &[&str],
    parents: Vec<ParentReference>,
    rules: Vec<HttpRouteRule>,
) -> k8s::HttpRoute {
    k8s::HttpRoute {
        metadata: mk_meta(ns, name),
        spec: HttpRouteSpec {
            parent_refs: parents,
            hostnames: hostnames.iter().map(|h| h.to_string()).collect(),
            rules,
        },
        status: None,
    }
}

pub(crate) fn mk_service(ns: &str, name: &str, port: i32) -> k8s::Service {
    k8s::Service {
        metadata: mk_meta(ns, name),
        spec: Some(k8s::ServiceSpec {
            cluster_ip: Some("10.0.0.1".to_string()),
            ports: Some(vec![k8s::ServicePort {
                port,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
