//! TCP and TLS routes forward whole connections, so each rule becomes a
//! single agent route per listener.

use super::{
    backend::{self, WeightedRef},
    parent, rule_name, Meta, RouteContext, RouteOutput,
};
use crate::attachment::RouteAttachment;
use agentgateway_controller_core::{
    agent::{AgentResource, Output, RouteBackend, TcpRoute},
    status::RouteStatusDraft,
    GroupKind,
};
use agentgateway_controller_k8s_api::{self as k8s, route::ParentReference, tcproute::StreamRouteRule};
use agentgateway_controller_krt::HandlerContext;

pub(super) fn translate_tcp(
    ctx: &mut HandlerContext<'_>,
    cx: &RouteContext,
    route: &k8s::TcpRoute,
) -> (Option<RouteStatusDraft>, Vec<RouteOutput>) {
    translate(
        ctx,
        cx,
        GroupKind::TCP_ROUTE,
        "tcp/",
        route,
        &[],
        &route.spec.parent_refs,
        &route.spec.rules,
    )
}

pub(super) fn translate_tls(
    ctx: &mut HandlerContext<'_>,
    cx: &RouteContext,
    route: &k8s::TlsRoute,
) -> (Option<RouteStatusDraft>, Vec<RouteOutput>) {
    translate(
        ctx,
        cx,
        GroupKind::TLS_ROUTE,
        "tls/",
        route,
        &route.spec.hostnames,
        &route.spec.parent_refs,
        &route.spec.rules,
    )
}

#[allow(clippy::too_many_arguments)]
fn translate<R: k8s::ResourceExt>(
    ctx: &mut HandlerContext<'_>,
    cx: &RouteContext,
    kind: GroupKind,
    prefix: &str,
    route: &R,
    hostnames: &[String],
    parent_refs: &[ParentReference],
    rules: &[StreamRouteRule],
) -> (Option<RouteStatusDraft>, Vec<RouteOutput>) {
    let Some(meta) = Meta::new(kind.clone(), route) else {
        return (None, vec![]);
    };
    let from = (&kind, meta.namespace.as_str());

    let mut errors = Vec::new();
    let compiled = rules
        .iter()
        .enumerate()
        .map(|(idx, rule)| {
            let backends = backend::resolve_all(
                ctx,
                &cx.lookups,
                from,
                rule.backend_refs.iter().map(|br| WeightedRef {
                    backend: &br.backend,
                    weight: br.weight,
                    filters: &[],
                }),
                &mut errors,
            );
            (rule_name(rule.name.as_deref(), idx), backends)
        })
        .collect::<Vec<(String, Vec<RouteBackend>)>>();

    let resolved = parent::resolve(ctx, cx, &kind, &meta.namespace, hostnames, parent_refs);

    let mut outputs = Vec::new();
    for attached in resolved.iter().filter_map(|r| r.result.as_ref().ok()).flatten() {
        let parent = &attached.parent;
        outputs.push(RouteOutput::Attachment(RouteAttachment {
            from: meta.source.clone(),
            gateway: parent.gateway.clone(),
            listener: parent.listener_name.clone(),
        }));
        for (i, (rule_name, backends)) in compiled.iter().enumerate() {
            let route = TcpRoute {
                key: format!(
                    "{prefix}{}.{}.{i}.{}",
                    meta.namespace, meta.name, parent.listener_name
                ),
                listener_key: parent.listener_key.clone(),
                route_name: meta.route_name(),
                rule_name: rule_name.clone(),
                hostnames: attached.hostnames.clone(),
                backends: backends.clone(),
            };
            outputs.push(RouteOutput::Resource(Output::Resource {
                gateway: Some(parent.gateway.clone()),
                resource: AgentResource::TcpRoute(route),
            }));
        }
    }

    let parents = resolved
        .iter()
        .map(|r| parent::status(r, &errors))
        .collect();
    (Some(meta.status(parents)), outputs)
}
