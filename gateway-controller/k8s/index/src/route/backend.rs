use super::filter;
use crate::Lookups;
use agentgateway_controller_core::{
    agent::{BackendReference, RouteBackend},
    ConfigError, ErrorKind, GroupKind,
};
use agentgateway_controller_k8s_api::{
    self as k8s, httproute::HttpRouteFilter, route::BackendObjectReference,
};
use agentgateway_controller_krt::HandlerContext;

/// A backend reference as it appears on any route kind.
pub(super) struct WeightedRef<'r> {
    pub(super) backend: &'r BackendObjectReference,
    pub(super) weight: Option<i32>,
    pub(super) filters: &'r [HttpRouteFilter],
}

/// Resolves the weighted backends of a rule.
///
/// Backends that fail to resolve are omitted and their errors recorded. When
/// every reference is explicitly weighted zero, the rule drops traffic.
pub(super) fn resolve_all<'r>(
    ctx: &mut HandlerContext<'_>,
    lookups: &Lookups,
    from: (&GroupKind, &str),
    refs: impl IntoIterator<Item = WeightedRef<'r>>,
    errors: &mut Vec<ConfigError>,
) -> Vec<RouteBackend> {
    let mut backends = Vec::new();
    let mut any = false;
    let mut all_zero = true;
    for r in refs {
        any = true;
        let weight = u32::try_from(r.weight.unwrap_or(1)).unwrap_or(0);
        if weight > 0 {
            all_zero = false;
        }
        match resolve(ctx, lookups, from, r.backend) {
            Ok(backend) => {
                let filters = filter::translate(ctx, lookups, from, r.filters, errors);
                backends.push(RouteBackend {
                    backend,
                    weight,
                    filters,
                });
            }
            Err(error) => {
                tracing::debug!(%error, "Omitting backend");
                errors.push(error);
            }
        }
    }

    if any && all_zero {
        return vec![RouteBackend {
            backend: BackendReference::Drop,
            weight: 1,
            filters: vec![],
        }];
    }
    backends
}

/// Resolves a single backend reference made by an object of kind `from.0` in
/// namespace `from.1`.
pub(crate) fn resolve(
    ctx: &mut HandlerContext<'_>,
    lookups: &Lookups,
    (from_kind, from_ns): (&GroupKind, &str),
    backend: &BackendObjectReference,
) -> Result<BackendReference, ConfigError> {
    let kind = GroupKind::from_ref(
        backend.group.as_deref(),
        backend.kind.as_deref(),
        &GroupKind::SERVICE,
    );
    let ns = backend.namespace.as_deref().unwrap_or(from_ns);
    let name = backend.name.as_str();

    if !lookups
        .grants
        .backend_allowed(ctx, (from_kind, from_ns), (&kind, ns, name))
    {
        return Err(ConfigError::new(
            ErrorKind::RefNotPermitted,
            format!("reference to {kind} {ns}/{name} is not permitted"),
        ));
    }

    let port = backend
        .port
        .map(|p| {
            u16::try_from(p).ok().filter(|p| *p > 0).ok_or_else(|| {
                ConfigError::new(
                    ErrorKind::InvalidDestination,
                    format!("invalid port {p} for {kind} {ns}/{name}"),
                )
            })
        })
        .transpose()?;
    let key = format!("{ns}/{name}");
    let not_found = || {
        ConfigError::new(
            ErrorKind::BackendNotFound,
            format!("{kind} {ns}/{name} not found"),
        )
    };

    if kind == GroupKind::SERVICE {
        let svc = ctx.fetch_one(&lookups.services, &key).ok_or_else(not_found)?;
        let port = match port {
            Some(port) => port,
            None => single_service_port(&svc).ok_or_else(|| {
                ConfigError::new(
                    ErrorKind::InvalidDestination,
                    format!("a port is required for Service {ns}/{name}"),
                )
            })?,
        };
        return Ok(BackendReference::Service {
            namespace: ns.to_string(),
            name: name.to_string(),
            hostname: lookups.config.service_hostname(ns, name),
            port,
        });
    }

    if kind == GroupKind::BACKEND {
        ctx.fetch_one(&lookups.backends, &key).ok_or_else(not_found)?;
        return Ok(BackendReference::Backend {
            namespace: ns.to_string(),
            name: name.to_string(),
            section: None,
        });
    }

    if kind == GroupKind::SERVICE_ENTRY {
        let se = ctx
            .fetch_one(&lookups.service_entries, &key)
            .ok_or_else(not_found)?;
        let Some(hostname) = se.spec.hosts.first() else {
            return Err(ConfigError::new(
                ErrorKind::InvalidDestination,
                format!("ServiceEntry {ns}/{name} has no hosts"),
            ));
        };
        let port = port
            .or_else(|| {
                se.spec
                    .ports
                    .first()
                    .and_then(|p| u16::try_from(p.number).ok())
            })
            .ok_or_else(|| {
                ConfigError::new(
                    ErrorKind::InvalidDestination,
                    format!("a port is required for ServiceEntry {ns}/{name}"),
                )
            })?;
        return Ok(BackendReference::Hostname {
            hostname: hostname.clone(),
            port,
        });
    }

    if kind == GroupKind::INFERENCE_POOL {
        let pool = ctx
            .fetch_one(&lookups.inference_pools, &key)
            .ok_or_else(not_found)?;
        let port = pool
            .spec
            .target_ports
            .first()
            .and_then(|p| u16::try_from(p.number).ok())
            .ok_or_else(|| {
                ConfigError::new(
                    ErrorKind::InvalidDestination,
                    format!("InferencePool {ns}/{name} has no target port"),
                )
            })?;
        return Ok(BackendReference::InferencePool {
            namespace: ns.to_string(),
            name: name.to_string(),
            hostname: format!("{name}.{ns}.inference.{}", lookups.config.cluster_domain),
            port,
        });
    }

    Err(ConfigError::new(
        ErrorKind::InvalidKind,
        format!("unsupported backend kind {kind}"),
    ))
}

/// A Service with exactly one port may be referenced without naming it.
fn single_service_port(svc: &k8s::Service) -> Option<u16> {
    let ports = svc.spec.as_ref()?.ports.as_ref()?;
    match ports.as_slice() {
        [port] => u16::try_from(port.port).ok(),
        _ => None,
    }
}
