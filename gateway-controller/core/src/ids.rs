use agentgateway_controller_krt::{Key, Keyed};
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt};

/// Identifies a kind of object by its API group.
///
/// Core Kubernetes kinds (`Service`, `Secret`, ...) use the empty group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKind {
    pub group: Cow<'static, str>,
    pub kind: Cow<'static, str>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

/// The object a derived value or status was produced from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectSource {
    pub kind: GroupKind,
    pub namespace: Option<String>,
    pub name: String,
}

const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";
const INFERENCE_GROUP: &str = "inference.networking.k8s.io";
const KGATEWAY_GROUP: &str = "gateway.kgateway.dev";
const AGENTGATEWAY_GROUP: &str = "agentgateway.dev";
const ISTIO_NETWORKING_GROUP: &str = "networking.istio.io";

const fn gk(group: &'static str, kind: &'static str) -> GroupKind {
    GroupKind {
        group: Cow::Borrowed(group),
        kind: Cow::Borrowed(kind),
    }
}

// === impl GroupKind ===

impl GroupKind {
    pub const GATEWAY_CLASS: Self = gk(GATEWAY_API_GROUP, "GatewayClass");
    pub const GATEWAY: Self = gk(GATEWAY_API_GROUP, "Gateway");
    pub const HTTP_ROUTE: Self = gk(GATEWAY_API_GROUP, "HTTPRoute");
    pub const GRPC_ROUTE: Self = gk(GATEWAY_API_GROUP, "GRPCRoute");
    pub const TCP_ROUTE: Self = gk(GATEWAY_API_GROUP, "TCPRoute");
    pub const TLS_ROUTE: Self = gk(GATEWAY_API_GROUP, "TLSRoute");
    pub const REFERENCE_GRANT: Self = gk(GATEWAY_API_GROUP, "ReferenceGrant");
    pub const BACKEND_TLS_POLICY: Self = gk(GATEWAY_API_GROUP, "BackendTLSPolicy");
    pub const SERVICE: Self = gk("", "Service");
    pub const SECRET: Self = gk("", "Secret");
    pub const CONFIG_MAP: Self = gk("", "ConfigMap");
    pub const INFERENCE_POOL: Self = gk(INFERENCE_GROUP, "InferencePool");
    pub const SERVICE_ENTRY: Self = gk(ISTIO_NETWORKING_GROUP, "ServiceEntry");
    pub const TRAFFIC_POLICY: Self = gk(KGATEWAY_GROUP, "TrafficPolicy");
    pub const HTTP_LISTENER_POLICY: Self = gk(KGATEWAY_GROUP, "HTTPListenerPolicy");
    pub const GATEWAY_EXTENSION: Self = gk(KGATEWAY_GROUP, "GatewayExtension");
    pub const BACKEND: Self = gk(AGENTGATEWAY_GROUP, "Backend");
    pub const AGENTGATEWAY_POLICY: Self = gk(AGENTGATEWAY_GROUP, "AgentgatewayPolicy");

    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: Cow::Owned(group.into()),
            kind: Cow::Owned(kind.into()),
        }
    }

    /// Builds a group/kind from the optional fields of an object reference,
    /// falling back to the reference's defaults when they are unset.
    pub fn from_ref(group: Option<&str>, kind: Option<&str>, default: &Self) -> Self {
        match (group, kind) {
            (None, None) => default.clone(),
            (group, kind) => Self::new(
                group.unwrap_or(&default.group),
                kind.unwrap_or(&default.kind),
            ),
        }
    }

    /// The `kind.group` form used in reference grant lookups.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            return f.write_str(&self.kind);
        }
        write!(f, "{}.{}", self.kind, self.group)
    }
}

// === impl NamespacedName ===

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl ObjectSource ===

impl ObjectSource {
    pub fn new(kind: GroupKind, namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace,
            name: name.into(),
        }
    }

    pub fn namespaced_name(&self) -> Option<NamespacedName> {
        self.namespace
            .as_ref()
            .map(|ns| NamespacedName::new(ns, &self.name))
    }
}

impl fmt::Display for ObjectSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

impl Keyed for ObjectSource {
    fn key(&self) -> Key {
        Key::from(self.to_string())
    }
}
