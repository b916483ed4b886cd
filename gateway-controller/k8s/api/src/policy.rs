//! Policy resources that attach to gateways, listeners, routes and backends
//! through `targetRefs`.

pub mod agentgateway;
pub mod backend_tls;
pub mod extension;
pub mod listener;
pub mod traffic;

pub use self::{
    agentgateway::AgentgatewayPolicy, backend_tls::BackendTlsPolicy,
    extension::GatewayExtension, listener::HttpListenerPolicy, traffic::TrafficPolicy,
};
pub use crate::route::{LocalPolicyTargetReference, PolicyStatus};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traffic_policy_from_json() {
        let policy: TrafficPolicy = serde_json::from_value(serde_json::json!({
            "apiVersion": "gateway.kgateway.dev/v1alpha1",
            "kind": "TrafficPolicy",
            "metadata": { "namespace": "ns", "name": "rbac" },
            "spec": {
                "targetRefs": [{
                    "group": "gateway.networking.k8s.io",
                    "kind": "HTTPRoute",
                    "name": "r",
                    "sectionName": "rule-a",
                }],
                "rbac": {
                    "rules": [{ "access": { "paths": ["/x"], "methods": ["GET"] } }],
                },
            },
        }))
        .expect("policy must parse");

        assert_eq!(policy.spec.target_refs.len(), 1);
        assert_eq!(
            policy.spec.target_refs[0].section_name.as_deref(),
            Some("rule-a")
        );
        let rbac = policy.spec.rbac.expect("rbac must be set");
        assert_eq!(rbac.action, None);
        assert_eq!(
            rbac.rules[0].access.as_ref().map(|a| a.methods.clone()),
            Some(vec!["GET".to_string()])
        );
    }

    #[test]
    fn backend_policy_from_json() {
        let policy: AgentgatewayPolicy = serde_json::from_value(serde_json::json!({
            "apiVersion": "agentgateway.dev/v1alpha1",
            "kind": "AgentgatewayPolicy",
            "metadata": { "namespace": "ns", "name": "mcp" },
            "spec": {
                "targetRefs": [{ "group": "agentgateway.dev", "kind": "Backend", "name": "tools" }],
                "backend": {
                    "mcp": {
                        "authorization": { "allow": ["mcp.tool.name == 'echo'"] },
                    },
                },
            },
        }))
        .expect("policy must parse");

        let mcp = policy
            .spec
            .backend
            .and_then(|b| b.mcp)
            .expect("mcp must be set");
        assert!(mcp.auth.is_none());
        assert_eq!(
            mcp.authorization.map(|a| a.allow),
            Some(vec!["mcp.tool.name == 'echo'".to_string()])
        );
    }
}
