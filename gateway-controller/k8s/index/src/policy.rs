//! Translates policy resources into agent policies.
//!
//! Each policy kind has a [`Translator`] that turns a resource into policy
//! specs. Specs are attached to every target the policy references, and the
//! contributions of all policies of one kind on one target are merged in
//! creation order into a single agent policy.

use crate::{attachment::Attachments, Inputs, Lookups, RouteAttachment};
use agentgateway_controller_core::{
    agent::Output,
    policy::{JwtMode, PolicySpec},
    status::PolicyStatusDraft,
    ConfigError, ErrorKind, GroupKind, ObjectSource,
};
use agentgateway_controller_k8s_api::{policy::LocalPolicyTargetReference, ResourceExt};
use agentgateway_controller_krt::{Collection, HandlerContext, Index, Runtime};
use kube::Resource;

mod agentgateway;
mod backend_tls;
mod listener;
mod merge;
mod status;
mod target;
mod traffic;

use self::merge::Contribution;

/// Policies report at most this many ancestors, followed by a summary.
pub const MAX_ANCESTORS: usize = 15;

pub(crate) struct Policies {
    pub(crate) resources: Collection<Output>,
    pub(crate) statuses: Collection<PolicyStatusDraft>,
}

/// Translates one kind of policy resource.
trait Translator {
    type Resource: Resource<DynamicType = ()> + Send + Sync + 'static;

    const KIND: GroupKind;

    /// The target kinds policies of this kind may attach to.
    const TARGETS: &'static [GroupKind];

    fn target_refs(policy: &Self::Resource) -> &[LocalPolicyTargetReference];

    /// Translates a policy into specs, recording errors for the parts that
    /// could not be translated.
    fn translate(
        ctx: &mut HandlerContext<'_>,
        lookups: &Lookups,
        ns: &str,
        policy: &Self::Resource,
        errors: &mut Vec<ConfigError>,
    ) -> Vec<PolicySpec>;
}

/// What a transformation reads while translating a policy.
#[derive(Clone)]
struct PolicyContext {
    lookups: Lookups,
    by_route: Index<RouteAttachment>,
}

// === impl Policies ===

impl Policies {
    pub(crate) fn build(
        rt: &Runtime,
        lookups: &Lookups,
        attachments: &Attachments,
        inputs: &Inputs,
    ) -> Self {
        let cx = PolicyContext {
            lookups: lookups.clone(),
            by_route: attachments.by_route.clone(),
        };

        let (traffic_statuses, traffic) =
            register::<traffic::Traffic>(rt, &cx, &inputs.traffic_policies.collection());
        let (listener_statuses, listener) =
            register::<listener::Listener>(rt, &cx, &inputs.listener_policies.collection());
        let (tls_statuses, tls) =
            register::<backend_tls::BackendTls>(rt, &cx, &inputs.backend_tls_policies.collection());
        let (agw_statuses, agw) = register::<agentgateway::Agentgateway>(
            rt,
            &cx,
            &inputs.agentgateway_policies.collection(),
        );

        let statuses = rt.join(
            "policies/status",
            vec![traffic_statuses, listener_statuses, tls_statuses, agw_statuses],
        );
        let contributions = rt.join("policies/contributions", vec![traffic, listener, tls, agw]);
        let resources = merge::build(rt, &contributions);

        Self {
            resources,
            statuses,
        }
    }
}

/// Adds the translation of one policy kind to the graph.
fn register<T: Translator + 'static>(
    rt: &Runtime,
    cx: &PolicyContext,
    policies: &Collection<T::Resource>,
) -> (Collection<PolicyStatusDraft>, Collection<Contribution>) {
    let cx = cx.clone();
    let name = format!("policies/{}", T::KIND.kind.to_lowercase());
    rt.status(name, policies, move |ctx, policy| translate::<T>(ctx, &cx, policy))
}

fn translate<T: Translator>(
    ctx: &mut HandlerContext<'_>,
    cx: &PolicyContext,
    policy: &T::Resource,
) -> (Option<PolicyStatusDraft>, Vec<Contribution>) {
    let Some(ns) = policy.namespace() else {
        tracing::warn!(kind = %T::KIND, name = %policy.name_any(), "Policy missing namespace");
        return (None, vec![]);
    };
    let name = policy.name_any();
    let _span = tracing::debug_span!("policy", kind = %T::KIND.kind, %ns, %name).entered();
    let source = ObjectSource::new(T::KIND, Some(ns.clone()), &name);

    let mut errors = Vec::new();
    let specs = T::translate(ctx, &cx.lookups, &ns, policy, &mut errors);
    for error in &errors {
        tracing::info!(%error, "Policy partially invalid");
    }

    let order = merge::Order {
        created: policy.meta().creation_timestamp.as_ref().map(|t| t.0),
        namespace: ns.clone(),
        name: name.clone(),
    };

    let mut contributions = Vec::new();
    let mut ancestors = Vec::new();
    let mut seen = Vec::new();
    for tr in T::target_refs(policy) {
        let resolved = target::resolve(ctx, cx, &ns, tr, T::TARGETS);
        if let Ok(t) = &resolved {
            if !seen.contains(&t.target) {
                seen.push(t.target.clone());
                for spec in &specs {
                    contributions.push(Contribution {
                        policy: source.clone(),
                        order: order.clone(),
                        target: t.target.clone(),
                        gateways: t.gateways.clone(),
                        spec: spec.clone(),
                    });
                }
            }
        }
        let ancestor = status::ancestor(&ns, tr, resolved.map(|_| ()), !specs.is_empty(), &errors);
        if !ancestors.contains(&ancestor) {
            ancestors.push(ancestor);
        }
    }

    let status = PolicyStatusDraft {
        policy: source,
        generation: policy.meta().generation,
        ancestors: status::cap(&T::KIND, &ns, ancestors),
    };
    (Some(status), contributions)
}

/// Parses a JWT validation mode, defaulting to strict validation.
fn jwt_mode(mode: Option<&str>) -> Result<JwtMode, ConfigError> {
    match mode {
        None | Some("") | Some("Strict") => Ok(JwtMode::Strict),
        Some("Optional") => Ok(JwtMode::Optional),
        Some("Permissive") => Ok(JwtMode::Permissive),
        Some(other) => Err(ConfigError::new(
            ErrorKind::InvalidConfiguration,
            format!("unsupported JWT mode {other}"),
        )),
    }
}

/// Reads a value from a Secret in the policy's namespace.
fn secret_value(
    ctx: &mut HandlerContext<'_>,
    lookups: &Lookups,
    ns: &str,
    name: &str,
    key: &str,
) -> Result<String, ConfigError> {
    let secret = ctx
        .fetch_one(&lookups.secrets, &format!("{ns}/{name}"))
        .ok_or_else(|| {
            ConfigError::new(
                ErrorKind::InvalidConfiguration,
                format!("Secret {ns}/{name} not found"),
            )
        })?;
    let value = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .ok_or_else(|| {
            ConfigError::new(
                ErrorKind::InvalidConfiguration,
                format!("Secret {ns}/{name} is missing {key}"),
            )
        })?;
    String::from_utf8(value.0.clone()).map_err(|_| {
        ConfigError::new(
            ErrorKind::InvalidConfiguration,
            format!("Secret {ns}/{name} {key} is not valid UTF-8"),
        )
    })
}

fn duration(field: &str, value: Option<&str>) -> Result<Option<std::time::Duration>, ConfigError> {
    value
        .map(|v| {
            v.parse::<agentgateway_controller_k8s_api::GoDuration>()
                .map(|d| d.as_duration())
                .map_err(|e| {
                    ConfigError::new(
                        ErrorKind::InvalidConfiguration,
                        format!("invalid {field} {v:?}: {e}"),
                    )
                })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_modes() {
        assert_eq!(jwt_mode(None), Ok(JwtMode::Strict));
        assert_eq!(jwt_mode(Some("Optional")), Ok(JwtMode::Optional));
        assert_eq!(jwt_mode(Some("Permissive")), Ok(JwtMode::Permissive));
        assert!(jwt_mode(Some("Lenient")).is_err());
    }
}
