//! Compiles Gateways into listeners that routes attach to.

use crate::{attachment::Attachments, Lookups};
use agentgateway_controller_core::{
    agent::{AgentResource, Bind, Listener, ListenerProtocol, Output, TlsConfig},
    status::{
        conditions, reasons, ConditionDraft, GatewayClassStatusDraft, GatewayStatusDraft,
        ListenerStatusDraft,
    },
    GroupKind, NamespacedName,
};
use agentgateway_controller_k8s_api::{self as k8s, labels, ResourceExt};
use agentgateway_controller_krt::{Collection, HandlerContext, Index, Key, Keyed, Runtime};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use std::collections::BTreeSet;

mod listener;
mod tls;

pub(crate) use self::tls::validate_certificates;

/// The port agents bind for waypoint (HBONE) traffic.
pub const WAYPOINT_PORT: u16 = 15008;

/// A Gateway owned by this controller, with its compiled listeners.
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayInfo {
    pub gateway: NamespacedName,
    pub generation: Option<i64>,
    pub waypoint: bool,
    pub listeners: Vec<ListenerInfo>,
    /// Problems with the gateway's listener set as a whole.
    pub invalid: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListenerInfo {
    pub name: String,
    pub port: u16,
    /// Unset when the listener's protocol is not supported.
    pub protocol: Option<ListenerProtocol>,
    pub hostname: Option<String>,
    pub allowed_kinds: Vec<GroupKind>,
    pub allowed_namespaces: AllowedNamespaces,
    pub tls: Option<TlsConfig>,
    pub conditions: Vec<ConditionDraft>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllowedNamespaces {
    All,
    Same,
    Selector(labels::Selector),
}

/// A programmed listener as seen by routes attempting to attach to it.
#[derive(Clone, Debug, PartialEq)]
pub struct ParentInfo {
    pub gateway: NamespacedName,
    pub listener_name: String,
    /// The stable identifier of the listener in agent output.
    pub listener_key: String,
    pub port: u16,
    pub protocol: ListenerProtocol,
    pub original_hostname: Option<String>,
    pub hostnames: Vec<String>,
    pub allowed_kinds: Vec<GroupKind>,
    pub allowed_namespaces: AllowedNamespaces,
}

pub(crate) struct Gateways {
    infos: Collection<GatewayInfo>,
    pub(crate) parents: Index<ParentInfo>,
    pub(crate) resources: Collection<Output>,
    pub(crate) class_statuses: Collection<GatewayClassStatusDraft>,
}

pub(crate) fn listener_key(gateway: &NamespacedName, listener: &str) -> String {
    format!("{}/{}-kgw-{listener}", gateway.namespace, gateway.name)
}

fn bind_key(port: u16, gateway: &NamespacedName) -> String {
    format!("{port}/{}/{}", gateway.namespace, gateway.name)
}

// === impl Gateways ===

impl Gateways {
    pub(crate) fn build(
        rt: &Runtime,
        lookups: &Lookups,
        classes: &Collection<k8s::GatewayClass>,
    ) -> Self {
        let config = lookups.config.clone();
        let class_statuses = rt.map("gatewayclasses/status", classes, move |_, class| {
            (class.spec.controller_name == config.controller_name).then(|| {
                GatewayClassStatusDraft {
                    name: class.name_any(),
                    generation: class.metadata.generation,
                    conditions: vec![ConditionDraft::new(
                        conditions::ACCEPTED,
                        true,
                        reasons::ACCEPTED,
                        format!("Handled by {}", config.controller_name),
                    )],
                }
            })
        });

        let infos = {
            let lookups = lookups.clone();
            let classes = classes.clone();
            rt.map("gateways/compiled", &lookups.gateways.clone(), move |ctx, gw| {
                compile(ctx, &lookups, &classes, gw)
            })
        };

        let parent_infos = rt.flat_map("gateways/parents", &infos, |_, gw| gw.parents());
        let parents = rt.index("gateways/parents/by-gateway", &parent_infos, |p| {
            vec![Key::from(p.gateway.to_string())]
        });
        let resources = rt.flat_map("gateways/resources", &infos, |_, gw| gw.resources());

        Self {
            infos,
            parents,
            resources,
            class_statuses,
        }
    }

    /// Joins route attachment counts into the final status of each gateway.
    pub(crate) fn statuses(
        &self,
        rt: &Runtime,
        attachments: &Attachments,
    ) -> Collection<GatewayStatusDraft> {
        let by_gateway = attachments.by_gateway.clone();
        rt.map("gateways/status", &self.infos, move |ctx, gw| {
            let attached = ctx.fetch_index(&by_gateway, &gw.gateway.to_string());
            let mut counts = HashMap::<&str, i32>::new();
            for a in &attached {
                *counts.entry(a.listener.as_str()).or_default() += 1;
            }
            Some(gw.status(&counts))
        })
    }
}

fn compile(
    ctx: &mut HandlerContext<'_>,
    lookups: &Lookups,
    classes: &Collection<k8s::GatewayClass>,
    gw: &k8s::Gateway,
) -> Option<GatewayInfo> {
    let Some(ns) = gw.namespace() else {
        tracing::warn!(name = %gw.name_any(), "Gateway missing namespace");
        return None;
    };
    let gateway = NamespacedName::new(ns, gw.name_any());
    let generation = gw.metadata.generation;

    // Waypoints are recognized by class name alone; their class object may
    // belong to the mesh.
    if gw.spec.gateway_class_name == lookups.config.waypoint_class {
        return Some(GatewayInfo {
            gateway,
            generation,
            waypoint: true,
            listeners: vec![],
            invalid: vec![],
        });
    }

    let class = ctx.fetch_one(classes, &gw.spec.gateway_class_name)?;
    if class.spec.controller_name != lookups.config.controller_name {
        return None;
    }

    let _span = tracing::debug_span!("gateway", ns = %gateway.namespace, name = %gateway.name)
        .entered();

    let mut names = HashSet::new();
    let mut invalid = Vec::new();
    let mut drafts = Vec::with_capacity(gw.spec.listeners.len());
    for l in &gw.spec.listeners {
        if !names.insert(l.name.as_str()) {
            tracing::info!(listener = %l.name, "Ignoring listener with duplicate name");
            invalid.push(format!("duplicate listener name {}", l.name));
            continue;
        }
        drafts.push(listener::compile(ctx, lookups, &gateway, l));
    }
    listener::detect_conflicts(&mut drafts);

    Some(GatewayInfo {
        gateway,
        generation,
        waypoint: false,
        listeners: drafts.into_iter().map(listener::Draft::finish).collect(),
        invalid,
    })
}

// === impl GatewayInfo ===

impl GatewayInfo {
    fn parents(&self) -> Vec<ParentInfo> {
        if self.waypoint {
            return vec![];
        }
        self.listeners
            .iter()
            .filter(|l| l.is_programmed())
            .filter_map(|l| {
                Some(ParentInfo {
                    gateway: self.gateway.clone(),
                    listener_name: l.name.clone(),
                    listener_key: listener_key(&self.gateway, &l.name),
                    port: l.port,
                    protocol: l.protocol?,
                    original_hostname: l.hostname.clone(),
                    hostnames: vec![l.hostname.clone().unwrap_or_else(|| "*".to_string())],
                    allowed_kinds: l.allowed_kinds.clone(),
                    allowed_namespaces: l.allowed_namespaces.clone(),
                })
            })
            .collect()
    }

    fn resources(&self) -> Vec<Output> {
        let gw = &self.gateway;
        let resource = |resource| Output::Resource {
            gateway: Some(gw.clone()),
            resource,
        };
        let mut out = vec![Output::Gateway(gw.clone())];

        if self.waypoint {
            let key = format!("waypoint/{gw}");
            out.push(resource(AgentResource::Bind(Bind {
                key: key.clone(),
                port: WAYPOINT_PORT,
            })));
            out.push(resource(AgentResource::Listener(Listener {
                key: key.clone(),
                name: "waypoint".to_string(),
                bind_key: key,
                gateway_name: gw.to_string(),
                hostname: None,
                protocol: ListenerProtocol::Hbone,
                tls: None,
            })));
            return out;
        }

        let mut ports = BTreeSet::new();
        for l in self.listeners.iter().filter(|l| l.is_programmed()) {
            let Some(protocol) = l.protocol else {
                continue;
            };
            let bind_key = bind_key(l.port, gw);
            if ports.insert(l.port) {
                out.push(resource(AgentResource::Bind(Bind {
                    key: bind_key.clone(),
                    port: l.port,
                })));
            }
            out.push(resource(AgentResource::Listener(Listener {
                key: listener_key(gw, &l.name),
                name: l.name.clone(),
                bind_key,
                gateway_name: gw.to_string(),
                hostname: l.hostname.clone(),
                protocol,
                tls: l.tls.clone(),
            })));
        }
        out
    }

    fn status(&self, attached: &HashMap<&str, i32>) -> GatewayStatusDraft {
        let listeners = self
            .listeners
            .iter()
            .map(|l| ListenerStatusDraft {
                name: l.name.clone(),
                supported_kinds: l.allowed_kinds.clone(),
                attached_routes: attached.get(l.name.as_str()).copied().unwrap_or(0),
                conditions: l.conditions.clone(),
            })
            .collect();

        let not_accepted = self
            .listeners
            .iter()
            .filter(|l| !l.is_accepted())
            .map(|l| l.name.as_str())
            .collect::<Vec<_>>();
        let not_programmed = self
            .listeners
            .iter()
            .filter(|l| !l.is_programmed())
            .map(|l| l.name.as_str())
            .collect::<Vec<_>>();

        let accepted = if !self.listeners.is_empty() && not_accepted.len() == self.listeners.len() {
            ConditionDraft::new(
                conditions::ACCEPTED,
                false,
                reasons::LISTENERS_NOT_VALID,
                "No listeners are valid",
            )
        } else if !not_accepted.is_empty() || !self.invalid.is_empty() {
            let mut problems = self.invalid.clone();
            if !not_accepted.is_empty() {
                problems.push(format!("invalid listeners: {}", not_accepted.join(", ")));
            }
            ConditionDraft::new(
                conditions::ACCEPTED,
                true,
                reasons::LISTENERS_NOT_VALID,
                problems.join("; "),
            )
        } else {
            ConditionDraft::new(conditions::ACCEPTED, true, reasons::ACCEPTED, "Gateway is accepted")
        };

        let programmed = if not_programmed.is_empty() && self.invalid.is_empty() {
            ConditionDraft::new(
                conditions::PROGRAMMED,
                true,
                reasons::PROGRAMMED,
                "Gateway is programmed",
            )
        } else {
            let mut problems = self.invalid.clone();
            if !not_programmed.is_empty() {
                problems.push(format!(
                    "listeners not programmed: {}",
                    not_programmed.join(", ")
                ));
            }
            ConditionDraft::new(
                conditions::PROGRAMMED,
                false,
                reasons::INVALID,
                problems.join("; "),
            )
        };

        GatewayStatusDraft {
            gateway: self.gateway.clone(),
            generation: self.generation,
            conditions: vec![accepted, programmed],
            listeners,
        }
    }
}

impl Keyed for GatewayInfo {
    fn key(&self) -> Key {
        Key::from(self.gateway.to_string())
    }
}

// === impl ListenerInfo ===

impl ListenerInfo {
    pub fn is_accepted(&self) -> bool {
        self.condition(conditions::ACCEPTED)
    }

    pub fn is_programmed(&self) -> bool {
        self.condition(conditions::PROGRAMMED)
    }

    fn condition(&self, type_: &str) -> bool {
        agentgateway_controller_core::status::find(&self.conditions, type_)
            .map_or(false, |c| c.status)
    }
}

// === impl AllowedNamespaces ===

impl AllowedNamespaces {
    /// Returns true if routes in `route_ns` may attach to a listener of a
    /// gateway in `gateway_ns`. `labels` are the route namespace's labels, if
    /// known.
    pub fn allows(&self, gateway_ns: &str, route_ns: &str, labels: Option<&labels::Map>) -> bool {
        match self {
            Self::All => true,
            Self::Same => gateway_ns == route_ns,
            Self::Selector(selector) => labels.map_or(false, |l| selector.matches(l)),
        }
    }
}

// === impl ParentInfo ===

impl ParentInfo {
    /// Returns true if routes of `kind` may attach to this listener.
    pub fn allows_kind(&self, kind: &GroupKind) -> bool {
        self.allowed_kinds.contains(kind)
    }

    pub fn hostname(&self) -> Option<&str> {
        self.original_hostname.as_deref()
    }
}

impl Keyed for ParentInfo {
    fn key(&self) -> Key {
        Key::from(format!("{}/{}", self.gateway, self.listener_name))
    }
}
