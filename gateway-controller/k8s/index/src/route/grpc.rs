use super::{
    backend::{self, WeightedRef},
    filter,
    http::{self, Rule},
    parent, rule_name, valid_regex, Meta, RouteContext, RouteOutput,
};
use agentgateway_controller_core::{
    agent::{HeaderMatch, PathMatch, RouteMatch},
    status::RouteStatusDraft,
    ConfigError, ErrorKind, GroupKind,
};
use agentgateway_controller_k8s_api::{self as k8s, grpcroute::GrpcRouteMatch};
use agentgateway_controller_krt::HandlerContext;

/// gRPC routes are served as HTTP routes matching on the request path.
pub(super) fn translate(
    ctx: &mut HandlerContext<'_>,
    cx: &RouteContext,
    route: &k8s::GrpcRoute,
) -> (Option<RouteStatusDraft>, Vec<RouteOutput>) {
    let Some(meta) = Meta::new(GroupKind::GRPC_ROUTE, route) else {
        return (None, vec![]);
    };
    let from = (&GroupKind::GRPC_ROUTE, meta.namespace.as_str());

    let mut errors = Vec::new();
    let mut rules = Vec::with_capacity(route.spec.rules.len());
    for (idx, rule) in route.spec.rules.iter().enumerate() {
        let matches = if rule.matches.is_empty() {
            vec![Some(RouteMatch::default())]
        } else {
            rule.matches
                .iter()
                .map(|m| grpc_match(m).map_err(|e| errors.push(e)).ok())
                .collect()
        };
        let filters = filter::translate(ctx, &cx.lookups, from, &rule.filters, &mut errors);
        let backends = backend::resolve_all(
            ctx,
            &cx.lookups,
            from,
            rule.backend_refs.iter().map(|br| WeightedRef {
                backend: &br.backend,
                weight: br.weight,
                filters: &br.filters,
            }),
            &mut errors,
        );
        rules.push(Rule {
            name: rule_name(None, idx),
            matches,
            filters,
            backends,
            timeouts: None,
        });
    }

    let resolved = parent::resolve(
        ctx,
        cx,
        &GroupKind::GRPC_ROUTE,
        &meta.namespace,
        &route.spec.hostnames,
        &route.spec.parent_refs,
    );
    let outputs = http::emit(&meta, &resolved, &rules, "grpc/");
    let parents = resolved
        .iter()
        .map(|r| parent::status(r, &errors))
        .collect();
    (Some(meta.status(parents)), outputs)
}

fn grpc_match(m: &GrpcRouteMatch) -> Result<RouteMatch, ConfigError> {
    let path = match &m.method {
        None => PathMatch::default(),
        Some(method) => {
            let service = method.service.as_deref().filter(|s| !s.is_empty());
            let name = method.method.as_deref().filter(|s| !s.is_empty());
            match method.type_.as_deref().unwrap_or("Exact") {
                "Exact" => match (service, name) {
                    (Some(svc), Some(rpc)) => PathMatch::Exact(format!("/{svc}/{rpc}")),
                    (Some(svc), None) => PathMatch::Prefix(format!("/{svc}")),
                    (None, Some(rpc)) => {
                        PathMatch::Regex(format!("/[^/]+/{}", regex::escape(rpc)))
                    }
                    (None, None) => PathMatch::default(),
                },
                "RegularExpression" => {
                    let service = service.map(valid_regex).transpose()?;
                    let name = name.map(valid_regex).transpose()?;
                    PathMatch::Regex(format!(
                        "/{}/{}",
                        service.as_deref().unwrap_or("[^/]+"),
                        name.as_deref().unwrap_or("[^/]+")
                    ))
                }
                other => {
                    return Err(ConfigError::new(
                        ErrorKind::InvalidConfiguration,
                        format!("unsupported method match type {other}"),
                    ))
                }
            }
        }
    };

    Ok(RouteMatch {
        path,
        headers: m
            .headers
            .iter()
            .map(|h| {
                Ok(HeaderMatch {
                    name: h.name.clone(),
                    value: http::string_match(h)?,
                })
            })
            .collect::<Result<_, ConfigError>>()?,
        query_params: vec![],
        method: None,
    })
}
