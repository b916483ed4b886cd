use super::{duration, jwt_mode, secret_value, Translator};
use crate::{route::backend, Lookups};
use agentgateway_controller_core::{
    policy::{
        ExtAuth, JwtAuthentication, JwtMode, JwtProvider, Jwks, PolicySpec, Rbac, RbacAction,
        RbacRule, Timeout,
    },
    ConfigError, ErrorKind, GroupKind,
};
use agentgateway_controller_k8s_api::policy::{
    traffic::{self as api, TrafficPolicy},
    LocalPolicyTargetReference,
};
use agentgateway_controller_krt::HandlerContext;

pub(super) struct Traffic;

impl Translator for Traffic {
    type Resource = TrafficPolicy;

    const KIND: GroupKind = GroupKind::TRAFFIC_POLICY;
    const TARGETS: &'static [GroupKind] = &[
        GroupKind::GATEWAY,
        GroupKind::HTTP_ROUTE,
        GroupKind::GRPC_ROUTE,
    ];

    fn target_refs(policy: &TrafficPolicy) -> &[LocalPolicyTargetReference] {
        &policy.spec.target_refs
    }

    fn translate(
        ctx: &mut HandlerContext<'_>,
        lookups: &Lookups,
        ns: &str,
        policy: &TrafficPolicy,
        errors: &mut Vec<ConfigError>,
    ) -> Vec<PolicySpec> {
        let spec = &policy.spec;
        let mut specs = Vec::new();
        let mut push = |result: Result<PolicySpec, ConfigError>| match result {
            Ok(spec) => specs.push(spec),
            Err(error) => errors.push(error),
        };

        if let Some(ext_auth) = &spec.ext_auth {
            push(self::ext_auth(ctx, lookups, ns, ext_auth));
        }
        if let Some(jwt) = &spec.jwt {
            push(self::jwt(ctx, lookups, ns, jwt));
        }
        if let Some(rbac) = &spec.rbac {
            push(self::rbac(rbac));
        }
        if let Some(t) = &spec.timeouts {
            push(timeouts(t));
        }
        specs
    }
}

fn ext_auth(
    ctx: &mut HandlerContext<'_>,
    lookups: &Lookups,
    ns: &str,
    ext_auth: &api::ExtAuth,
) -> Result<PolicySpec, ConfigError> {
    let name = &ext_auth.extension_ref.name;
    let ext = ctx
        .fetch_one(&lookups.gateway_extensions, &format!("{ns}/{name}"))
        .ok_or_else(|| {
            ConfigError::new(
                ErrorKind::InvalidConfiguration,
                format!("GatewayExtension {ns}/{name} not found"),
            )
        })?;
    let provider = ext.spec.ext_auth.as_ref().ok_or_else(|| {
        ConfigError::new(
            ErrorKind::InvalidConfiguration,
            format!("GatewayExtension {ns}/{name} does not configure extAuth"),
        )
    })?;
    let target = backend::resolve(
        ctx,
        lookups,
        (&GroupKind::GATEWAY_EXTENSION, ns),
        &provider.grpc.backend_ref,
    )?;
    Ok(PolicySpec::ExtAuth(ExtAuth {
        target: Some(target),
        context: ext_auth.context_extensions.clone(),
    }))
}

fn jwt(
    ctx: &mut HandlerContext<'_>,
    lookups: &Lookups,
    ns: &str,
    jwt: &api::Jwt,
) -> Result<PolicySpec, ConfigError> {
    let mode = if jwt.allow_missing_or_failed == Some(true) {
        JwtMode::Permissive
    } else {
        jwt_mode(jwt.mode.as_deref())?
    };

    let providers = jwt
        .providers
        .iter()
        .map(|p| {
            let jwks = match (&p.jwks.local, &p.jwks.remote) {
                (Some(local), _) => match (&local.key, &local.secret_ref) {
                    (Some(key), _) => Jwks::Inline(key.clone()),
                    (None, Some(secret)) => {
                        Jwks::Inline(secret_value(ctx, lookups, ns, secret, "jwks")?)
                    }
                    (None, None) => return Err(missing_jwks(&p.name)),
                },
                (None, Some(remote)) => Jwks::Remote {
                    uri: remote.url.clone(),
                    cache_duration: duration("cacheDuration", remote.cache_duration.as_deref())?,
                },
                (None, None) => return Err(missing_jwks(&p.name)),
            };
            Ok(JwtProvider {
                name: p.name.clone(),
                issuer: Some(p.issuer.clone()).filter(|i| !i.is_empty()),
                audiences: p.audiences.clone(),
                jwks,
                claims_to_headers: p
                    .claims_to_headers
                    .iter()
                    .map(|c| (c.name.clone(), c.header.clone()))
                    .collect(),
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(PolicySpec::Jwt(JwtAuthentication {
        mode: Some(mode),
        providers,
    }))
}

fn missing_jwks(provider: &str) -> ConfigError {
    ConfigError::new(
        ErrorKind::InvalidConfiguration,
        format!("JWT provider {provider} has no JWKS source"),
    )
}

fn rbac(rbac: &api::Rbac) -> Result<PolicySpec, ConfigError> {
    let action = match rbac.action.as_deref() {
        None | Some("Allow") => RbacAction::Allow,
        Some("Deny") => RbacAction::Deny,
        Some(other) => {
            return Err(ConfigError::new(
                ErrorKind::InvalidConfiguration,
                format!("unsupported RBAC action {other}"),
            ))
        }
    };
    let rules = rbac
        .rules
        .iter()
        .map(|r| RbacRule {
            claims: r
                .principal
                .as_ref()
                .map(|p| p.jwt_claims.clone())
                .unwrap_or_default(),
            paths: r.access.as_ref().map(|a| a.paths.clone()).unwrap_or_default(),
            methods: r
                .access
                .as_ref()
                .map(|a| a.methods.clone())
                .unwrap_or_default(),
        })
        .collect();
    Ok(PolicySpec::Rbac(Rbac {
        action: Some(action),
        rules,
    }))
}

fn timeouts(t: &api::Timeouts) -> Result<PolicySpec, ConfigError> {
    Ok(PolicySpec::Timeout(Timeout {
        request: duration("request timeout", t.request.as_deref())?,
        backend_request: duration("backendRequest timeout", t.backend_request.as_deref())?,
    }))
}
