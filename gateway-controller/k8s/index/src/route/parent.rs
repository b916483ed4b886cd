use super::RouteContext;
use crate::ParentInfo;
use agentgateway_controller_core::{
    hostname,
    status::{conditions, reasons, ConditionDraft, ParentRef, ParentStatusDraft},
    ConfigError, GroupKind, NamespacedName,
};
use agentgateway_controller_k8s_api::route::ParentReference;
use agentgateway_controller_krt::HandlerContext;
use std::{cmp::Ordering, sync::Arc};

/// The outcome of resolving one Gateway parent reference.
pub(super) struct Resolved {
    pub(super) parent_ref: ParentRef,
    pub(super) result: Result<Vec<Attached>, Denied>,
}

/// A listener a route attached to, and the hostnames it serves there.
pub(super) struct Attached {
    pub(super) parent: Arc<ParentInfo>,
    pub(super) hostnames: Vec<String>,
}

pub(super) struct Denied {
    reason: &'static str,
    message: String,
}

/// Resolves each Gateway parent reference of a route to the listeners it
/// attaches to. References to other parent kinds are ignored.
pub(super) fn resolve(
    ctx: &mut HandlerContext<'_>,
    cx: &RouteContext,
    kind: &GroupKind,
    route_ns: &str,
    route_hostnames: &[String],
    refs: &[ParentReference],
) -> Vec<Resolved> {
    let mut resolved = Vec::with_capacity(refs.len());
    for pr in refs {
        let parent_kind =
            GroupKind::from_ref(pr.group.as_deref(), pr.kind.as_deref(), &GroupKind::GATEWAY);
        if parent_kind != GroupKind::GATEWAY {
            tracing::debug!(parent = %parent_kind, name = %pr.name, "Ignoring non-Gateway parent");
            continue;
        }

        let gateway = NamespacedName::new(
            pr.namespace.as_deref().unwrap_or(route_ns),
            pr.name.clone(),
        );
        let port = pr.port.and_then(|p| u16::try_from(p).ok());
        let parent_ref = ParentRef {
            kind: GroupKind::GATEWAY,
            namespace: Some(gateway.namespace.clone()),
            name: gateway.name.clone(),
            section_name: pr.section_name.clone(),
            port,
        };
        let result = attach(ctx, cx, kind, route_ns, route_hostnames, &gateway, pr, port);
        resolved.push(Resolved { parent_ref, result });
    }
    resolved
}

#[allow(clippy::too_many_arguments)]
fn attach(
    ctx: &mut HandlerContext<'_>,
    cx: &RouteContext,
    kind: &GroupKind,
    route_ns: &str,
    route_hostnames: &[String],
    gateway: &NamespacedName,
    pr: &ParentReference,
    port: Option<u16>,
) -> Result<Vec<Attached>, Denied> {
    let mut siblings = ctx.fetch_index(&cx.parents, &gateway.to_string());
    siblings.sort_by(|a, b| a.listener_name.cmp(&b.listener_name));

    let candidates = siblings
        .iter()
        .filter(|p| {
            pr.section_name
                .as_deref()
                .map_or(true, |s| s == p.listener_name)
        })
        .filter(|p| port.map_or(true, |port| port == p.port))
        .collect::<Vec<_>>();
    if candidates.is_empty() {
        return Err(Denied::new(
            reasons::NO_MATCHING_PARENT,
            format!("no listener of Gateway {gateway} matches the parent reference"),
        ));
    }

    let labels = ctx
        .fetch_one(&cx.lookups.namespaces, route_ns)
        .and_then(|ns| ns.metadata.labels.clone());
    let allowed = candidates
        .into_iter()
        .filter(|p| p.allows_kind(kind))
        .filter(|p| {
            p.allowed_namespaces
                .allows(&gateway.namespace, route_ns, labels.as_ref())
        })
        .collect::<Vec<_>>();
    if allowed.is_empty() {
        return Err(Denied::new(
            reasons::NOT_ALLOWED_BY_LISTENERS,
            format!("no listener of Gateway {gateway} allows this route"),
        ));
    }

    let mut overlapped = false;
    let mut attached = Vec::new();
    for parent in allowed {
        let hostnames = hostname::route_hostnames(parent.hostname(), route_hostnames);
        if hostnames.is_empty() {
            continue;
        }
        overlapped = true;
        let hostnames = hostnames
            .into_iter()
            .filter(|h| !claimed_elsewhere(parent, &siblings, h))
            .collect::<Vec<_>>();
        if !hostnames.is_empty() {
            attached.push(Attached {
                parent: parent.clone(),
                hostnames,
            });
        }
    }

    if attached.is_empty() {
        if overlapped {
            return Err(Denied::new(
                reasons::PARENT_REF_CONFLICT,
                "route hostnames are served by more specific listeners",
            ));
        }
        return Err(Denied::new(
            reasons::NO_MATCHING_LISTENER_HOSTNAME,
            "no route hostname matches a listener hostname",
        ));
    }
    Ok(attached)
}

/// Returns true if another listener on the same port serves `host` and is a
/// more specific match for it than `parent`. Ties go to the listener with the
/// lowest name.
fn claimed_elsewhere(parent: &ParentInfo, siblings: &[Arc<ParentInfo>], host: &str) -> bool {
    siblings.iter().any(|other| {
        if other.listener_name == parent.listener_name || other.port != parent.port {
            return false;
        }
        if hostname::intersect(other.hostname(), host).as_deref() != Some(host) {
            return false;
        }
        match hostname::cmp_specificity(other.hostname(), parent.hostname()) {
            Ordering::Less => true,
            Ordering::Equal => other.listener_name < parent.listener_name,
            Ordering::Greater => false,
        }
    })
}

/// Builds the status of a parent reference. Translation errors are reported
/// on every parent, since they do not depend on the listener.
pub(super) fn status(resolved: &Resolved, errors: &[ConfigError]) -> ParentStatusDraft {
    let accepted = match &resolved.result {
        Ok(_) => ConditionDraft::new(
            conditions::ACCEPTED,
            true,
            reasons::ACCEPTED,
            "Route was valid",
        ),
        Err(denied) => ConditionDraft::new(
            conditions::ACCEPTED,
            false,
            denied.reason,
            denied.message.clone(),
        ),
    };
    let resolved_refs = match errors.first() {
        None => ConditionDraft::new(
            conditions::RESOLVED_REFS,
            true,
            reasons::RESOLVED_REFS,
            "All references resolved",
        ),
        Some(first) => ConditionDraft::new(
            conditions::RESOLVED_REFS,
            false,
            first.reason(),
            errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        ),
    };
    ParentStatusDraft {
        parent_ref: resolved.parent_ref.clone(),
        conditions: vec![accepted, resolved_refs],
    }
}

// === impl Denied ===

impl Denied {
    fn new(reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}
