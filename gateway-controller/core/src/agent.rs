//! Resources consumed by agentgateway data-plane instances.

use crate::{policy::Policy, NamespacedName};
use agentgateway_controller_krt::{Key, Keyed};
use chrono::{offset::Utc, DateTime};
use serde::{Deserialize, Serialize};
use std::{
    cmp::{Ordering, Reverse},
    collections::BTreeMap,
    fmt,
    time::Duration,
};

mod route;

pub use self::route::{
    HeaderMatch, HeaderModifier, PathMatch, PathModifier, QueryParamMatch, RequestMirror,
    RequestRedirect, RouteFilter, RouteMatch, StringMatch, UrlRewrite,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentResource {
    Bind(Bind),
    Listener(Listener),
    Route(Route),
    TcpRoute(TcpRoute),
    Backend(Backend),
    Policy(Policy),
}

/// A port an agent binds on behalf of one or more listeners.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bind {
    pub key: String,
    pub port: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub key: String,
    pub name: String,
    pub bind_key: String,
    pub gateway_name: String,
    pub hostname: Option<String>,
    pub protocol: ListenerProtocol,
    pub tls: Option<TlsConfig>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ListenerProtocol {
    Http,
    Https,
    Tcp,
    Tls,
    Hbone,
}

/// PEM encoded serving material for a terminating listener.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    pub cert: String,
    pub private_key: String,
}

/// A single HTTP route match bound to a single listener.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub key: String,
    pub listener_key: String,
    pub route_name: String,
    pub rule_name: String,
    pub hostnames: Vec<String>,
    pub matches: Vec<RouteMatch>,
    pub filters: Vec<RouteFilter>,
    pub backends: Vec<RouteBackend>,
    pub timeouts: Option<RouteTimeouts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpRoute {
    pub key: String,
    pub listener_key: String,
    pub route_name: String,
    pub rule_name: String,
    pub hostnames: Vec<String>,
    pub backends: Vec<RouteBackend>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteBackend {
    pub backend: BackendReference,
    pub weight: u32,
    pub filters: Vec<RouteFilter>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BackendReference {
    Service {
        namespace: String,
        name: String,
        hostname: String,
        port: u16,
    },
    Hostname {
        hostname: String,
        port: u16,
    },
    Backend {
        namespace: String,
        name: String,
        section: Option<String>,
    },
    InferencePool {
        namespace: String,
        name: String,
        hostname: String,
        port: u16,
    },
    /// Traffic is rejected rather than forwarded.
    Drop,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTimeouts {
    pub request: Option<Duration>,
    pub backend_request: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub name: String,
    pub kind: BackendKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BackendKind {
    Static {
        host: String,
        port: u16,
    },
    Ai {
        provider: String,
        model: Option<String>,
        host_override: Option<String>,
    },
    Mcp {
        targets: Vec<McpTarget>,
    },
    InferencePool {
        target_port: u16,
        selector: BTreeMap<String, String>,
        endpoint_picker: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTarget {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub path: Option<String>,
    pub protocol: McpProtocol,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum McpProtocol {
    #[serde(rename = "SSE")]
    Sse,
    StreamableHttp,
}

/// Workload addressing information distributed alongside agent resources.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AddressResource {
    Service(ServiceAddress),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAddress {
    pub namespace: String,
    pub name: String,
    pub hostname: String,
    /// Cluster IPs, qualified by the cluster they belong to (`cluster/ip`).
    pub vips: Vec<String>,
    /// Service ports mapped to target ports. A target port of `0` means the
    /// target port is named and must be resolved per endpoint.
    pub ports: BTreeMap<u16, u16>,
    pub ip_families: Vec<String>,
    pub internal_traffic_policy: Option<String>,
    pub publish_not_ready_addresses: bool,
}

/// An item of translated output, scoped to the gateways that receive it.
#[derive(Clone, Debug, PartialEq)]
pub enum Output {
    /// Announces a gateway that receives snapshots.
    Gateway(NamespacedName),
    /// A resource for a single gateway, or for every gateway when `gateway`
    /// is unset.
    Resource {
        gateway: Option<NamespacedName>,
        resource: AgentResource,
    },
    /// An address distributed to every gateway.
    Address(AddressResource),
}

// === impl AgentResource ===

impl AgentResource {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bind(_) => "bind",
            Self::Listener(_) => "listener",
            Self::Route(_) => "route",
            Self::TcpRoute(_) => "tcproute",
            Self::Backend(_) => "backend",
            Self::Policy(_) => "policy",
        }
    }

    /// The resource's name, unique within its type.
    pub fn name(&self) -> &str {
        match self {
            Self::Bind(b) => &b.key,
            Self::Listener(l) => &l.key,
            Self::Route(r) => &r.key,
            Self::TcpRoute(r) => &r.key,
            Self::Backend(b) => &b.name,
            Self::Policy(p) => &p.name,
        }
    }
}

// === impl AddressResource ===

impl AddressResource {
    pub fn name(&self) -> String {
        match self {
            Self::Service(svc) => format!("{}/{}", svc.namespace, svc.name),
        }
    }
}

// === impl Output ===

impl Keyed for Output {
    fn key(&self) -> Key {
        match self {
            Self::Gateway(gw) => Key::from(format!("gateway/{gw}")),
            Self::Resource {
                gateway: Some(gw),
                resource,
            } => Key::from(format!(
                "resource/{gw}/{}/{}",
                resource.type_name(),
                resource.name()
            )),
            Self::Resource {
                gateway: None,
                resource,
            } => Key::from(format!(
                "resource/*/{}/{}",
                resource.type_name(),
                resource.name()
            )),
            Self::Address(addr) => Key::from(format!("address/{}", addr.name())),
        }
    }
}

// === impl TlsConfig ===

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("cert", &format_args!("{} bytes", self.cert.len()))
            .finish_non_exhaustive()
    }
}

// === impl Route ===

impl Route {
    /// Orders routes for matching: more specific path matches first, then
    /// older routes, then by route name and key.
    pub fn cmp_precedence(&self, other: &Self) -> Ordering {
        let path_rank = |r: &Self| {
            r.matches
                .first()
                .map(|m| m.path.rank())
                .unwrap_or((1, Reverse(1)))
        };
        path_rank(self)
            .cmp(&path_rank(other))
            .then_with(|| match (&self.creation_timestamp, &other.creation_timestamp) {
                (Some(a), Some(b)) => a.cmp(b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| self.route_name.cmp(&other.route_name))
            .then_with(|| self.key.cmp(&other.key))
    }
}

// === impl BackendReference ===

impl fmt::Display for BackendReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service {
                namespace,
                name,
                port,
                ..
            }
            | Self::InferencePool {
                namespace,
                name,
                port,
                ..
            } => write!(f, "{namespace}/{name}:{port}"),
            Self::Hostname { hostname, port } => write!(f, "{hostname}:{port}"),
            Self::Backend {
                namespace,
                name,
                section: Some(section),
            } => write!(f, "{namespace}/{name}/{section}"),
            Self::Backend {
                namespace, name, ..
            } => write!(f, "{namespace}/{name}"),
            Self::Drop => f.write_str("drop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn route(key: &str, path: PathMatch, created: Option<i64>) -> Route {
        Route {
            key: key.to_string(),
            listener_key: "default/gw-kgw-http".to_string(),
            route_name: "default/r".to_string(),
            rule_name: "rule-0".to_string(),
            hostnames: vec![],
            matches: vec![RouteMatch {
                path,
                ..Default::default()
            }],
            filters: vec![],
            backends: vec![],
            timeouts: None,
            creation_timestamp: created.and_then(|s| DateTime::from_timestamp(s, 0)),
        }
    }

    #[test]
    fn precedence() {
        let mut routes = vec![
            route("regex", PathMatch::Regex("/.*".into()), Some(1)),
            route("short", PathMatch::Prefix("/".into()), Some(1)),
            route("long", PathMatch::Prefix("/foo/bar".into()), Some(1)),
            route("exact", PathMatch::Exact("/foo".into()), Some(5)),
            route("young", PathMatch::Prefix("/foo/bar".into()), Some(9)),
        ];
        routes.sort_by(Route::cmp_precedence);
        let keys = routes.iter().map(|r| r.key.as_str()).collect::<Vec<_>>();
        assert_eq!(keys, vec!["exact", "long", "young", "short", "regex"]);
    }

    #[test]
    fn backend_reference_display() {
        let svc = BackendReference::Service {
            namespace: "default".into(),
            name: "svc".into(),
            hostname: "svc.default.svc.cluster.local".into(),
            port: 8080,
        };
        assert_eq!(svc.to_string(), "default/svc:8080");
        assert_eq!(BackendReference::Drop.to_string(), "drop");
    }
}
