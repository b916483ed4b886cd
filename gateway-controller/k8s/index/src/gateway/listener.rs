use super::{tls, AllowedNamespaces, ListenerInfo};
use crate::Lookups;
use agentgateway_controller_core::{
    agent::{ListenerProtocol, TlsConfig},
    status::{conditions, reasons, ConditionDraft},
    ErrorKind, GroupKind, NamespacedName,
};
use agentgateway_controller_k8s_api::gateway::{self as api, FromNamespaces, TlsMode};
use agentgateway_controller_krt::HandlerContext;
use ahash::AHashMap as HashMap;

/// A listener whose conditions are still being determined.
pub(super) struct Draft {
    name: String,
    port: u16,
    protocol: Option<ListenerProtocol>,
    hostname: Option<String>,
    allowed_kinds: Vec<GroupKind>,
    allowed_namespaces: AllowedNamespaces,
    tls: Option<TlsConfig>,
    rejected: Option<(&'static str, String)>,
    unresolved: Option<(&'static str, String)>,
    conflicted: Option<(&'static str, String)>,
}

pub(super) fn compile(
    ctx: &mut HandlerContext<'_>,
    lookups: &Lookups,
    gateway: &NamespacedName,
    listener: &api::Listener,
) -> Draft {
    let mut draft = Draft {
        name: listener.name.clone(),
        port: 0,
        protocol: None,
        hostname: listener.hostname.clone().filter(|h| !h.is_empty() && h != "*"),
        allowed_kinds: vec![],
        allowed_namespaces: allowed_namespaces(listener),
        tls: None,
        rejected: None,
        unresolved: None,
        conflicted: None,
    };

    match u16::try_from(listener.port).ok().filter(|p| *p > 0) {
        Some(port) => draft.port = port,
        None => {
            draft.rejected = Some((
                reasons::UNSUPPORTED_VALUE,
                format!("invalid port {}", listener.port),
            ));
            return draft;
        }
    }

    let mode = listener.tls.as_ref().and_then(|t| t.mode);
    let Some((protocol, kinds)) = protocol(&listener.protocol, mode) else {
        draft.rejected = Some((
            ErrorKind::UnsupportedProtocol.reason(),
            format!("protocol {} is not supported", listener.protocol),
        ));
        return draft;
    };
    draft.protocol = Some(protocol);
    draft.allowed_kinds = kinds;

    let requested = listener
        .allowed_routes
        .as_ref()
        .map(|ar| ar.kinds.as_slice())
        .unwrap_or_default();
    if !requested.is_empty() {
        let mut allowed = Vec::new();
        let mut invalid = Vec::new();
        for rgk in requested {
            let gk = GroupKind::from_ref(rgk.group.as_deref(), Some(&rgk.kind), &GroupKind::HTTP_ROUTE);
            if draft.allowed_kinds.contains(&gk) {
                if !allowed.contains(&gk) {
                    allowed.push(gk);
                }
            } else {
                invalid.push(gk.to_string());
            }
        }
        draft.allowed_kinds = allowed;
        if !invalid.is_empty() {
            draft.unresolved = Some((
                reasons::INVALID_ROUTE_KINDS,
                format!("unsupported route kinds: {}", invalid.join(", ")),
            ));
        }
    }

    let terminates = match protocol {
        ListenerProtocol::Https => true,
        ListenerProtocol::Tls => mode != Some(TlsMode::Passthrough),
        _ => false,
    };
    if terminates {
        match tls::resolve(ctx, lookups, gateway, listener.tls.as_ref()) {
            Ok(tls) => draft.tls = Some(tls),
            Err(error) => {
                tracing::info!(listener = %listener.name, %error, "Invalid listener TLS");
                draft.unresolved = Some((error.reason(), error.message));
            }
        }
    }

    draft
}

/// Listeners sharing a port must agree on protocol and must not share a
/// hostname.
pub(super) fn detect_conflicts(drafts: &mut [Draft]) {
    let mut by_port = HashMap::<u16, Vec<usize>>::new();
    for (i, d) in drafts.iter().enumerate() {
        if d.rejected.is_none() {
            by_port.entry(d.port).or_default().push(i);
        }
    }

    for idxs in by_port.values() {
        let protocols = idxs
            .iter()
            .filter_map(|i| drafts[*i].protocol.map(port_family))
            .collect::<Vec<_>>();
        if protocols.windows(2).any(|w| w[0] != w[1]) {
            for i in idxs {
                let port = drafts[*i].port;
                drafts[*i].conflicted = Some((
                    reasons::PROTOCOL_CONFLICT,
                    format!("listeners on port {port} use incompatible protocols"),
                ));
            }
            continue;
        }

        let mut hostnames = HashMap::<Option<&str>, usize>::new();
        let mut conflicts = Vec::new();
        for i in idxs {
            let host = drafts[*i].hostname.as_deref();
            match hostnames.get(&host) {
                Some(first) => {
                    conflicts.push(*first);
                    conflicts.push(*i);
                }
                None => {
                    hostnames.insert(host, *i);
                }
            }
        }
        for i in conflicts {
            let host = drafts[i].hostname.clone().unwrap_or_else(|| "*".to_string());
            drafts[i].conflicted = Some((
                reasons::HOSTNAME_CONFLICT,
                format!("hostname {host} is used by another listener on this port"),
            ));
        }
    }
}

/// Protocols that may share a port.
fn port_family(protocol: ListenerProtocol) -> u8 {
    match protocol {
        ListenerProtocol::Http => 0,
        ListenerProtocol::Https | ListenerProtocol::Tls => 1,
        ListenerProtocol::Tcp => 2,
        ListenerProtocol::Hbone => 3,
    }
}

fn protocol(protocol: &str, mode: Option<TlsMode>) -> Option<(ListenerProtocol, Vec<GroupKind>)> {
    let http = || vec![GroupKind::HTTP_ROUTE, GroupKind::GRPC_ROUTE];
    match protocol {
        "HTTP" => Some((ListenerProtocol::Http, http())),
        "HTTPS" => Some((ListenerProtocol::Https, http())),
        "TCP" => Some((ListenerProtocol::Tcp, vec![GroupKind::TCP_ROUTE])),
        "TLS" if mode == Some(TlsMode::Passthrough) => {
            Some((ListenerProtocol::Tls, vec![GroupKind::TLS_ROUTE]))
        }
        "TLS" => Some((ListenerProtocol::Tls, vec![GroupKind::TCP_ROUTE])),
        // Agent protocols are served over plain HTTP listeners.
        "MCP" | "A2A" | "kgateway.dev/mcp" | "kgateway.dev/a2a" => {
            Some((ListenerProtocol::Http, vec![GroupKind::HTTP_ROUTE]))
        }
        _ => None,
    }
}

fn allowed_namespaces(listener: &api::Listener) -> AllowedNamespaces {
    let Some(namespaces) = listener
        .allowed_routes
        .as_ref()
        .and_then(|ar| ar.namespaces.as_ref())
    else {
        return AllowedNamespaces::Same;
    };
    match namespaces.from.unwrap_or_default() {
        FromNamespaces::All => AllowedNamespaces::All,
        FromNamespaces::Same => AllowedNamespaces::Same,
        FromNamespaces::Selector => {
            AllowedNamespaces::Selector(namespaces.selector.clone().unwrap_or_default())
        }
    }
}

// === impl Draft ===

impl Draft {
    pub(super) fn finish(self) -> ListenerInfo {
        let accepted = match &self.rejected {
            None => ConditionDraft::new(
                conditions::ACCEPTED,
                true,
                reasons::ACCEPTED,
                "Listener is accepted",
            ),
            Some((reason, message)) => {
                ConditionDraft::new(conditions::ACCEPTED, false, *reason, message.clone())
            }
        };
        let conflicted = match &self.conflicted {
            None => ConditionDraft::new(
                conditions::CONFLICTED,
                false,
                reasons::NO_CONFLICTS,
                "Listener has no conflicts",
            ),
            Some((reason, message)) => {
                ConditionDraft::new(conditions::CONFLICTED, true, *reason, message.clone())
            }
        };
        let resolved = match &self.unresolved {
            None => ConditionDraft::new(
                conditions::RESOLVED_REFS,
                true,
                reasons::RESOLVED_REFS,
                "All references resolved",
            ),
            Some((reason, message)) => {
                ConditionDraft::new(conditions::RESOLVED_REFS, false, *reason, message.clone())
            }
        };
        let programmed =
            if self.rejected.is_none() && self.unresolved.is_none() && self.conflicted.is_none() {
                ConditionDraft::new(
                    conditions::PROGRAMMED,
                    true,
                    reasons::PROGRAMMED,
                    "Listener is programmed",
                )
            } else {
                ConditionDraft::new(
                    conditions::PROGRAMMED,
                    false,
                    reasons::INVALID,
                    "Listener is invalid",
                )
            };

        ListenerInfo {
            name: self.name,
            port: self.port,
            protocol: self.protocol,
            hostname: self.hostname,
            allowed_kinds: self.allowed_kinds,
            allowed_namespaces: self.allowed_namespaces,
            tls: self.tls,
            conditions: vec![accepted, conflicted, resolved, programmed],
        }
    }
}
