use agentgateway_controller_core::{NamespacedName, ObjectSource};
use agentgateway_controller_krt::{Collection, Index, Key, Keyed, Runtime};

/// Records that a route successfully attached to a gateway listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteAttachment {
    pub from: ObjectSource,
    pub gateway: NamespacedName,
    pub listener: String,
}

/// Looks up attachments by the gateway or the route involved.
pub(crate) struct Attachments {
    pub(crate) by_gateway: Index<RouteAttachment>,
    pub(crate) by_route: Index<RouteAttachment>,
}

// === impl Attachments ===

impl Attachments {
    pub(crate) fn new(rt: &Runtime, attachments: &Collection<RouteAttachment>) -> Self {
        let by_gateway = rt.index("attachments/by-gateway", attachments, |a| {
            vec![Key::from(a.gateway.to_string())]
        });
        let by_route = rt.index("attachments/by-route", attachments, |a| {
            vec![a.from.key()]
        });
        Self {
            by_gateway,
            by_route,
        }
    }
}

// === impl RouteAttachment ===

impl Keyed for RouteAttachment {
    fn key(&self) -> Key {
        Key::from(format!("{}/{}/{}", self.gateway, self.listener, self.from))
    }
}
