use super::{jwt_mode, secret_value, Translator};
use crate::Lookups;
use agentgateway_controller_core::{
    policy::{
        AiPolicy, BackendAuth, McpAuthentication, McpAuthorization, Message, PolicySpec,
        PromptGuard,
    },
    ConfigError, ErrorKind, GroupKind,
};
use agentgateway_controller_k8s_api::policy::{
    agentgateway::{self as api, AgentgatewayPolicy},
    LocalPolicyTargetReference,
};
use agentgateway_controller_krt::HandlerContext;

/// The Secret key holding a backend credential.
const AUTHORIZATION_KEY: &str = "Authorization";

pub(super) struct Agentgateway;

impl Translator for Agentgateway {
    type Resource = AgentgatewayPolicy;

    const KIND: GroupKind = GroupKind::AGENTGATEWAY_POLICY;
    const TARGETS: &'static [GroupKind] = &[GroupKind::BACKEND, GroupKind::SERVICE];

    fn target_refs(policy: &AgentgatewayPolicy) -> &[LocalPolicyTargetReference] {
        &policy.spec.target_refs
    }

    fn translate(
        ctx: &mut HandlerContext<'_>,
        lookups: &Lookups,
        ns: &str,
        policy: &AgentgatewayPolicy,
        errors: &mut Vec<ConfigError>,
    ) -> Vec<PolicySpec> {
        let Some(backend) = &policy.spec.backend else {
            return vec![];
        };

        let mut specs = Vec::new();
        if let Some(mcp) = &backend.mcp {
            if let Some(auth) = &mcp.auth {
                match backend_auth(ctx, lookups, ns, auth) {
                    Ok(spec) => specs.push(spec),
                    Err(error) => errors.push(error),
                }
            }
            if let Some(authz) = &mcp.authorization {
                specs.push(PolicySpec::McpAuthorization(McpAuthorization {
                    allow: authz.allow.clone(),
                    deny: authz.deny.clone(),
                }));
            }
            if let Some(authn) = &mcp.authentication {
                match authentication(authn) {
                    Ok(spec) => specs.push(spec),
                    Err(error) => errors.push(error),
                }
            }
        }
        if let Some(ai) = &backend.ai {
            specs.push(PolicySpec::Ai(ai_policy(ai)));
        }
        specs
    }
}

fn backend_auth(
    ctx: &mut HandlerContext<'_>,
    lookups: &Lookups,
    ns: &str,
    auth: &api::BackendAuth,
) -> Result<PolicySpec, ConfigError> {
    let key = match (&auth.key, &auth.secret_ref) {
        (Some(key), _) => Some(key.clone()),
        (None, Some(secret)) => Some(secret_value(ctx, lookups, ns, secret, AUTHORIZATION_KEY)?),
        (None, None) if auth.passthrough == Some(true) => None,
        (None, None) => {
            return Err(ConfigError::new(
                ErrorKind::InvalidConfiguration,
                "backend auth requires a key, a secretRef or passthrough",
            ))
        }
    };
    Ok(PolicySpec::BackendAuth(BackendAuth {
        key,
        passthrough: auth.passthrough,
    }))
}

fn authentication(authn: &api::McpAuthentication) -> Result<PolicySpec, ConfigError> {
    let non_empty = |s: &str| Some(s.to_string()).filter(|s| !s.is_empty());
    Ok(PolicySpec::McpAuthentication(McpAuthentication {
        issuer: non_empty(&authn.issuer),
        audiences: authn.audiences.clone(),
        jwks_uri: non_empty(&authn.jwks_uri),
        mode: Some(jwt_mode(authn.mode.as_deref())?),
    }))
}

fn ai_policy(ai: &api::AiPolicy) -> AiPolicy {
    let messages = |msgs: &[api::Message]| {
        msgs.iter()
            .map(|m| Message {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect::<Vec<_>>()
    };
    let guards = |guards: &[api::PromptGuard]| {
        guards
            .iter()
            .map(|g| PromptGuard {
                patterns: g.regex.clone(),
                rejection_message: g.rejection_message.clone(),
            })
            .collect::<Vec<_>>()
    };
    let enrichment = ai.prompt_enrichment.clone().unwrap_or_default();
    let guard = ai.prompt_guard.clone().unwrap_or_default();
    AiPolicy {
        defaults: ai.defaults.clone(),
        overrides: ai.overrides.clone(),
        prompt_prepend: messages(&enrichment.prepend),
        prompt_append: messages(&enrichment.append),
        prompt_caching: ai.prompt_caching,
        model_aliases: ai.model_aliases.clone(),
        request_guard: guards(&guard.request),
        response_guard: guards(&guard.response),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgateway_controller_core::policy::JwtMode;

    #[test]
    fn authentication_omits_empty_fields() {
        let spec = authentication(&api::McpAuthentication {
            issuer: "https://issuer".into(),
            audiences: vec!["mcp".into()],
            jwks_uri: String::new(),
            mode: Some("Optional".into()),
        })
        .expect("valid");
        assert_eq!(
            spec,
            PolicySpec::McpAuthentication(McpAuthentication {
                issuer: Some("https://issuer".into()),
                audiences: vec!["mcp".into()],
                jwks_uri: None,
                mode: Some(JwtMode::Optional),
            })
        );
    }

    #[test]
    fn ai_policy_maps_guards_and_enrichment() {
        let ai = ai_policy(&api::AiPolicy {
            prompt_enrichment: Some(api::PromptEnrichment {
                prepend: vec![api::Message {
                    role: "system".into(),
                    content: "be brief".into(),
                }],
                append: vec![],
            }),
            prompt_guard: Some(api::PromptGuards {
                request: vec![api::PromptGuard {
                    regex: vec!["ssn".into()],
                    rejection_message: Some("no".into()),
                }],
                response: vec![],
            }),
            ..Default::default()
        });
        assert_eq!(ai.prompt_prepend[0].content, "be brief");
        assert_eq!(ai.request_guard[0].patterns, vec!["ssn".to_string()]);
        assert!(ai.response_guard.is_empty());
    }
}
