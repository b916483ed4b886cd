use super::{
    backend::{self, WeightedRef},
    filter, parent, rule_name, trim_trailing_slash, valid_regex, Meta, RouteContext, RouteOutput,
};
use crate::attachment::RouteAttachment;
use agentgateway_controller_core::{
    agent::{
        AgentResource, HeaderMatch, Output, PathMatch, QueryParamMatch, Route, RouteBackend,
        RouteFilter, RouteMatch, RouteTimeouts, StringMatch,
    },
    status::RouteStatusDraft,
    ConfigError, ErrorKind, GroupKind,
};
use agentgateway_controller_k8s_api::{
    self as k8s,
    httproute::{HttpHeaderMatch, HttpRouteMatch, HttpRouteTimeouts},
    GoDuration,
};
use agentgateway_controller_krt::HandlerContext;

/// A rule compiled independently of the listeners it is bound to.
pub(super) struct Rule {
    pub(super) name: String,
    /// One entry per match; `None` marks a match that failed to translate.
    pub(super) matches: Vec<Option<RouteMatch>>,
    pub(super) filters: Vec<RouteFilter>,
    pub(super) backends: Vec<RouteBackend>,
    pub(super) timeouts: Option<RouteTimeouts>,
}

pub(super) fn translate(
    ctx: &mut HandlerContext<'_>,
    cx: &RouteContext,
    route: &k8s::HttpRoute,
) -> (Option<RouteStatusDraft>, Vec<RouteOutput>) {
    let Some(meta) = Meta::new(GroupKind::HTTP_ROUTE, route) else {
        return (None, vec![]);
    };
    let from = (&GroupKind::HTTP_ROUTE, meta.namespace.as_str());

    let mut errors = Vec::new();
    let rules = route
        .spec
        .rules
        .iter()
        .enumerate()
        .map(|(idx, rule)| {
            let matches = if rule.matches.is_empty() {
                vec![Some(RouteMatch::default())]
            } else {
                rule.matches
                    .iter()
                    .map(|m| {
                        route_match(m)
                            .map_err(|e| errors.push(e))
                            .ok()
                    })
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
            let timeouts = rule
                .timeouts
                .as_ref()
                .and_then(|t| timeouts(t).map_err(|e| errors.push(e)).ok());
            Rule {
                name: rule_name(rule.name.as_deref(), idx),
                matches,
                filters,
                backends,
                timeouts,
            }
        })
        .collect::<Vec<_>>();

    let resolved = parent::resolve(
        ctx,
        cx,
        &GroupKind::HTTP_ROUTE,
        &meta.namespace,
        &route.spec.hostnames,
        &route.spec.parent_refs,
    );
    let outputs = emit(&meta, &resolved, &rules, "");
    let parents = resolved
        .iter()
        .map(|r| parent::status(r, &errors))
        .collect();
    (Some(meta.status(parents)), outputs)
}

/// Binds compiled rules to each listener the route attached to. `prefix`
/// distinguishes the keys of route kinds that share this representation.
pub(super) fn emit(
    meta: &Meta,
    resolved: &[parent::Resolved],
    rules: &[Rule],
    prefix: &str,
) -> Vec<RouteOutput> {
    let mut outputs = Vec::new();
    for attached in resolved.iter().filter_map(|r| r.result.as_ref().ok()).flatten() {
        let parent = &attached.parent;
        outputs.push(RouteOutput::Attachment(RouteAttachment {
            from: meta.source.clone(),
            gateway: parent.gateway.clone(),
            listener: parent.listener_name.clone(),
        }));

        for (i, rule) in rules.iter().enumerate() {
            for (j, m) in rule.matches.iter().enumerate() {
                let Some(m) = m else { continue };
                let route = Route {
                    key: format!(
                        "{prefix}{}.{}.{i}.{j}.{}",
                        meta.namespace, meta.name, parent.listener_name
                    ),
                    listener_key: parent.listener_key.clone(),
                    route_name: meta.route_name(),
                    rule_name: rule.name.clone(),
                    hostnames: attached.hostnames.clone(),
                    matches: vec![m.clone()],
                    filters: rule.filters.clone(),
                    backends: rule.backends.clone(),
                    timeouts: rule.timeouts.clone(),
                    creation_timestamp: meta.created,
                };
                outputs.push(RouteOutput::Resource(Output::Resource {
                    gateway: Some(parent.gateway.clone()),
                    resource: AgentResource::Route(route),
                }));
            }
        }
    }
    outputs
}

fn route_match(m: &HttpRouteMatch) -> Result<RouteMatch, ConfigError> {
    let path = match &m.path {
        None => PathMatch::default(),
        Some(p) => {
            let value = p.value.as_deref().unwrap_or("/");
            match p.type_.as_deref().unwrap_or("PathPrefix") {
                "PathPrefix" => PathMatch::Prefix(trim_trailing_slash(value)),
                "Exact" => PathMatch::Exact(value.to_string()),
                "RegularExpression" => PathMatch::Regex(valid_regex(value)?),
                other => {
                    return Err(ConfigError::new(
                        ErrorKind::InvalidConfiguration,
                        format!("unsupported path match type {other}"),
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
                    value: string_match(h)?,
                })
            })
            .collect::<Result<_, ConfigError>>()?,
        query_params: m
            .query_params
            .iter()
            .map(|q| {
                Ok(QueryParamMatch {
                    name: q.name.clone(),
                    value: string_match(q)?,
                })
            })
            .collect::<Result<_, ConfigError>>()?,
        method: m.method.clone(),
    })
}

pub(super) fn string_match(m: &HttpHeaderMatch) -> Result<StringMatch, ConfigError> {
    match m.type_.as_deref().unwrap_or("Exact") {
        "Exact" => Ok(StringMatch::Exact(m.value.clone())),
        "RegularExpression" => Ok(StringMatch::Regex(valid_regex(&m.value)?)),
        other => Err(ConfigError::new(
            ErrorKind::InvalidConfiguration,
            format!("unsupported match type {other} for {}", m.name),
        )),
    }
}

fn timeouts(t: &HttpRouteTimeouts) -> Result<RouteTimeouts, ConfigError> {
    let parse = |field: &str, v: &Option<String>| {
        v.as_deref()
            .map(|s| {
                s.parse::<GoDuration>()
                    .map(|d| d.as_duration())
                    .map_err(|e| {
                        ConfigError::new(
                            ErrorKind::InvalidConfiguration,
                            format!("invalid {field} timeout {s:?}: {e}"),
                        )
                    })
            })
            .transpose()
    };
    Ok(RouteTimeouts {
        request: parse("request", &t.request)?,
        backend_request: parse("backendRequest", &t.backend_request)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgateway_controller_k8s_api::httproute::HttpPathMatch;
    use std::time::Duration;

    #[test]
    fn path_defaults_to_root_prefix() {
        let m = route_match(&HttpRouteMatch::default()).expect("valid");
        assert_eq!(m.path, PathMatch::Prefix("/".to_string()));
    }

    #[test]
    fn prefix_is_trimmed() {
        let m = route_match(&HttpRouteMatch {
            path: Some(HttpPathMatch {
                type_: None,
                value: Some("/api/".to_string()),
            }),
            ..Default::default()
        })
        .expect("valid");
        assert_eq!(m.path, PathMatch::Prefix("/api".to_string()));
    }

    #[test]
    fn unknown_header_match_is_invalid() {
        let err = route_match(&HttpRouteMatch {
            headers: vec![HttpHeaderMatch {
                type_: Some("Prefix".to_string()),
                name: "x-foo".to_string(),
                value: "bar".to_string(),
            }],
            ..Default::default()
        })
        .expect_err("invalid");
        assert_eq!(err.kind, ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn invalid_regexes_are_rejected() {
        let path = route_match(&HttpRouteMatch {
            path: Some(HttpPathMatch {
                type_: Some("RegularExpression".to_string()),
                value: Some("/api/(".to_string()),
            }),
            ..Default::default()
        })
        .expect_err("invalid path");
        assert_eq!(path.kind, ErrorKind::InvalidConfiguration);

        let header = HttpHeaderMatch {
            type_: Some("RegularExpression".to_string()),
            name: "x-foo".to_string(),
            value: "[a-".to_string(),
        };
        assert!(route_match(&HttpRouteMatch {
            headers: vec![header.clone()],
            ..Default::default()
        })
        .is_err());
        assert!(route_match(&HttpRouteMatch {
            query_params: vec![header],
            ..Default::default()
        })
        .is_err());

        let valid = route_match(&HttpRouteMatch {
            path: Some(HttpPathMatch {
                type_: Some("RegularExpression".to_string()),
                value: Some("/api/v[0-9]+/.*".to_string()),
            }),
            ..Default::default()
        })
        .expect("valid");
        assert_eq!(valid.path, PathMatch::Regex("/api/v[0-9]+/.*".to_string()));
    }

    #[test]
    fn parses_timeouts() {
        let t = timeouts(&HttpRouteTimeouts {
            request: Some("10s".to_string()),
            backend_request: None,
        })
        .expect("valid");
        assert_eq!(t.request, Some(Duration::from_secs(10)));
        assert_eq!(t.backend_request, None);

        assert!(timeouts(&HttpRouteTimeouts {
            request: Some("ten seconds".to_string()),
            backend_request: None,
        })
        .is_err());
    }
}
