//! Compiles routes into agent routes bound to gateway listeners.
//!
//! Each route kind is translated independently. A route yields one agent
//! route per (listener, rule, match), one attachment per listener it attached
//! to, and a status entry per Gateway parent reference.

use crate::{attachment::RouteAttachment, gateway::Gateways, Inputs, Lookups, ParentInfo};
use agentgateway_controller_core::{
    agent::Output,
    status::{ParentStatusDraft, RouteStatusDraft},
    ConfigError, ErrorKind, GroupKind, ObjectSource,
};
use agentgateway_controller_k8s_api::{self as k8s, ResourceExt};
use agentgateway_controller_krt::{Collection, Index, Key, Keyed, Runtime};
use chrono::{offset::Utc, DateTime};

pub(crate) mod backend;
mod filter;
mod grpc;
mod http;
mod parent;
mod stream;

pub(crate) struct Routes {
    pub(crate) attachments: Collection<RouteAttachment>,
    pub(crate) resources: Collection<Output>,
    pub(crate) statuses: Collection<RouteStatusDraft>,
}

/// What a transformation reads while compiling a route.
#[derive(Clone)]
struct RouteContext {
    lookups: Lookups,
    parents: Index<ParentInfo>,
}

#[derive(Clone, Debug, PartialEq)]
enum RouteOutput {
    Resource(Output),
    Attachment(RouteAttachment),
}

/// The identity of the route being compiled.
struct Meta {
    source: ObjectSource,
    namespace: String,
    name: String,
    generation: Option<i64>,
    created: Option<DateTime<Utc>>,
}

// === impl Routes ===

impl Routes {
    pub(crate) fn build(
        rt: &Runtime,
        lookups: &Lookups,
        gateways: &Gateways,
        inputs: &Inputs,
    ) -> Self {
        let cx = RouteContext {
            lookups: lookups.clone(),
            parents: gateways.parents.clone(),
        };

        let (http_statuses, http) = {
            let cx = cx.clone();
            rt.status("httproutes", &lookups.http_routes, move |ctx, route| {
                http::translate(ctx, &cx, route)
            })
        };
        let (grpc_statuses, grpc) = {
            let cx = cx.clone();
            rt.status("grpcroutes", &lookups.grpc_routes, move |ctx, route| {
                grpc::translate(ctx, &cx, route)
            })
        };
        let (tcp_statuses, tcp) = {
            let cx = cx.clone();
            rt.status(
                "tcproutes",
                &inputs.tcp_routes.collection(),
                move |ctx, route| stream::translate_tcp(ctx, &cx, route),
            )
        };
        let (tls_statuses, tls) = rt.status(
            "tlsroutes",
            &inputs.tls_routes.collection(),
            move |ctx, route| stream::translate_tls(ctx, &cx, route),
        );

        let statuses = rt.join(
            "routes/status",
            vec![http_statuses, grpc_statuses, tcp_statuses, tls_statuses],
        );
        let outputs = rt.join("routes/outputs", vec![http, grpc, tcp, tls]);
        let resources = rt.flat_map("routes/resources", &outputs, |_, out| match out {
            RouteOutput::Resource(r) => vec![r.clone()],
            RouteOutput::Attachment(_) => vec![],
        });
        let attachments = rt.flat_map("routes/attachments", &outputs, |_, out| match out {
            RouteOutput::Attachment(a) => vec![a.clone()],
            RouteOutput::Resource(_) => vec![],
        });

        Self {
            attachments,
            resources,
            statuses,
        }
    }
}

// === impl RouteOutput ===

impl Keyed for RouteOutput {
    fn key(&self) -> Key {
        match self {
            Self::Resource(r) => Key::from(format!("out/{}", r.key())),
            Self::Attachment(a) => Key::from(format!("attach/{}", a.key())),
        }
    }
}

// === impl Meta ===

impl Meta {
    fn new<R>(kind: GroupKind, route: &R) -> Option<Self>
    where
        R: ResourceExt,
    {
        let Some(namespace) = route.namespace() else {
            tracing::warn!(%kind, name = %route.name_any(), "Route missing namespace");
            return None;
        };
        let name = route.name_any();
        Some(Self {
            source: ObjectSource::new(kind, Some(namespace.clone()), &name),
            namespace,
            name,
            generation: route.meta().generation,
            created: route.meta().creation_timestamp.as_ref().map(|k8s::Time(t)| *t),
        })
    }

    fn route_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    fn status(&self, parents: Vec<ParentStatusDraft>) -> RouteStatusDraft {
        RouteStatusDraft {
            route: self.source.clone(),
            generation: self.generation,
            parents,
        }
    }
}

fn rule_name(name: Option<&str>, idx: usize) -> String {
    match name {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("rule-{idx}"),
    }
}

/// Regular expressions are compiled by the data plane; one that does not
/// compile here would be rejected there.
fn valid_regex(pattern: &str) -> Result<String, ConfigError> {
    regex::Regex::new(pattern).map_err(|error| {
        ConfigError::new(
            ErrorKind::InvalidConfiguration,
            format!("invalid regular expression {pattern:?}: {error}"),
        )
    })?;
    Ok(pattern.to_string())
}

/// Prefix paths are compared without a trailing slash, except for the root.
fn trim_trailing_slash(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}
