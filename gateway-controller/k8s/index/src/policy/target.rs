use super::PolicyContext;
use agentgateway_controller_core::{policy::PolicyTarget, GroupKind, NamespacedName, ObjectSource};
use agentgateway_controller_k8s_api::policy::LocalPolicyTargetReference;
use agentgateway_controller_krt::{HandlerContext, Keyed};

/// A target reference resolved to an agent policy target.
#[derive(Debug)]
pub(super) struct Resolved {
    pub(super) target: PolicyTarget,
    /// The gateways that receive policies on this target. Backends and
    /// services are global.
    pub(super) gateways: Option<Vec<NamespacedName>>,
}

#[derive(Debug, PartialEq, Eq)]
pub(super) enum Unresolved {
    /// The policy kind cannot attach to the referenced kind.
    Unsupported(String),
    /// The referenced object does not exist (yet).
    NotFound(String),
}

/// Resolves a policy's target reference within the policy's namespace.
pub(super) fn resolve(
    ctx: &mut HandlerContext<'_>,
    cx: &PolicyContext,
    ns: &str,
    tr: &LocalPolicyTargetReference,
    supported: &[GroupKind],
) -> Result<Resolved, Unresolved> {
    let kind = GroupKind::new(tr.group.as_str(), tr.kind.as_str());
    if !supported.contains(&kind) {
        return Err(Unresolved::Unsupported(format!(
            "policy cannot target {kind}"
        )));
    }
    let nn = NamespacedName::new(ns, &tr.name);
    let section = tr.section_name.clone().filter(|s| !s.is_empty());
    let not_found = || Unresolved::NotFound(format!("{kind} {nn} not found"));

    if kind == GroupKind::GATEWAY {
        ctx.fetch_one(&cx.lookups.gateways, &nn.to_string())
            .ok_or_else(not_found)?;
        let target = match section {
            Some(listener) => PolicyTarget::Listener {
                gateway: nn.clone(),
                listener,
            },
            None => PolicyTarget::Gateway(nn.clone()),
        };
        return Ok(Resolved {
            target,
            gateways: Some(vec![nn]),
        });
    }

    if kind == GroupKind::HTTP_ROUTE || kind == GroupKind::GRPC_ROUTE {
        let routes = if kind == GroupKind::HTTP_ROUTE {
            ctx.fetch_one(&cx.lookups.http_routes, &nn.to_string()).map(|_| ())
        } else {
            ctx.fetch_one(&cx.lookups.grpc_routes, &nn.to_string()).map(|_| ())
        };
        routes.ok_or_else(not_found)?;

        // Route policies are sent to every gateway the route is attached to.
        let source = ObjectSource::new(kind.clone(), Some(ns.to_string()), &tr.name);
        let mut gateways = ctx
            .fetch_index(&cx.by_route, source.key().as_str())
            .into_iter()
            .map(|a| a.gateway.clone())
            .collect::<Vec<_>>();
        gateways.sort();
        gateways.dedup();

        let target = match section {
            Some(rule) => PolicyTarget::RouteRule {
                route: nn.clone(),
                rule,
            },
            None => PolicyTarget::Route(nn.clone()),
        };
        return Ok(Resolved {
            target,
            gateways: Some(gateways),
        });
    }

    if kind == GroupKind::BACKEND {
        ctx.fetch_one(&cx.lookups.backends, &nn.to_string())
            .ok_or_else(not_found)?;
        let target = match section {
            Some(section) => PolicyTarget::SubBackend {
                backend: nn,
                section,
            },
            None => PolicyTarget::Backend(nn),
        };
        return Ok(Resolved {
            target,
            gateways: None,
        });
    }

    if kind == GroupKind::SERVICE {
        let svc = ctx
            .fetch_one(&cx.lookups.services, &nn.to_string())
            .ok_or_else(not_found)?;
        let port = match &section {
            None => None,
            Some(section) => {
                let port = svc
                    .spec
                    .iter()
                    .flat_map(|s| s.ports.iter().flatten())
                    .find(|p| p.name.as_deref() == Some(section.as_str()))
                    .and_then(|p| u16::try_from(p.port).ok());
                match port {
                    Some(port) => Some(port),
                    None => {
                        return Err(Unresolved::NotFound(format!(
                            "Service {nn} has no port named {section}"
                        )))
                    }
                }
            }
        };
        return Ok(Resolved {
            target: PolicyTarget::Service {
                hostname: cx.lookups.config.service_hostname(ns, &tr.name),
                port,
            },
            gateways: None,
        });
    }

    Err(Unresolved::Unsupported(format!(
        "policy cannot target {kind}"
    )))
}
