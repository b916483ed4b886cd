use super::*;
use agentgateway_controller_core::{
    policy::{
        AccessLog, ListenerSettings, Policy, PolicySpec, PolicyTarget, Rbac, RbacAction, RbacRule,
    },
    status::{conditions, reasons},
    NamespacedName,
};
use agentgateway_controller_k8s_api::{
    policy::{
        listener::{AccessLog as ApiAccessLog, HttpListenerPolicySpec},
        traffic::{self, TrafficPolicySpec},
        HttpListenerPolicy, LocalPolicyTargetReference, TrafficPolicy,
    },
    Time,
};
use chrono::DateTime;
use pretty_assertions::assert_eq;

fn target(kind: &str, name: &str) -> LocalPolicyTargetReference {
    LocalPolicyTargetReference {
        group: "gateway.networking.k8s.io".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        section_name: None,
    }
}

fn rbac_policy(
    name: &str,
    created: i64,
    targets: Vec<LocalPolicyTargetReference>,
    method: &str,
) -> TrafficPolicy {
    TrafficPolicy {
        metadata: ObjectMeta {
            creation_timestamp: DateTime::from_timestamp(created, 0).map(Time),
            ..mk_meta("default", name)
        },
        spec: TrafficPolicySpec {
            target_refs: targets,
            rbac: Some(traffic::Rbac {
                action: None,
                rules: vec![traffic::RbacRule {
                    principal: None,
                    access: Some(traffic::RbacAccess {
                        paths: vec![],
                        methods: vec![method.to_string()],
                    }),
                }],
            }),
            ..Default::default()
        },
        status: None,
    }
}

fn policies(test: &TestConfig) -> Vec<(Option<NamespacedName>, Policy)> {
    let mut policies = test
        .resources()
        .iter()
        .filter_map(|o| match &**o {
            Output::Resource {
                gateway,
                resource: AgentResource::Policy(p),
            } => Some((gateway.clone(), p.clone())),
            _ => None,
        })
        .collect::<Vec<_>>();
    policies.sort_by(|a, b| a.1.name.cmp(&b.1.name));
    policies
}

fn route_on_gateway(test: &TestConfig) {
    test.inputs.gateways.apply(mk_gateway(
        "default",
        "gw",
        CLASS,
        vec![mk_listener("http", 80, "HTTP")],
    ));
    test.inputs.http_routes.apply(mk_http_route(
        "default",
        "r",
        &[],
        vec![mk_parent("default", "gw", None)],
        vec![mk_rule(vec![path_prefix("/")], vec![])],
    ));
}

#[test]
fn route_policies_merge_by_age() {
    let test = TestConfig::new();
    route_on_gateway(&test);
    // The younger policy is applied first to show that order comes from age.
    test.inputs
        .traffic_policies
        .apply(rbac_policy("p2", 2000, vec![target("HTTPRoute", "r")], "POST"));
    test.inputs
        .traffic_policies
        .apply(rbac_policy("p1", 1000, vec![target("HTTPRoute", "r")], "GET"));
    test.flush();

    let gw = NamespacedName::new("default", "gw");
    let rule = |method: &str| RbacRule {
        claims: Default::default(),
        paths: vec![],
        methods: vec![method.to_string()],
    };
    assert_eq!(
        policies(&test),
        vec![(
            Some(gw),
            Policy {
                name: "route/default/r/rbac".to_string(),
                target: PolicyTarget::Route(NamespacedName::new("default", "r")),
                spec: PolicySpec::Rbac(Rbac {
                    action: Some(RbacAction::Allow),
                    rules: vec![rule("GET"), rule("POST")],
                }),
            }
        )]
    );

    for name in ["p1", "p2"] {
        let status = test.policy_status(GroupKind::TRAFFIC_POLICY, "default", name);
        assert_eq!(status.ancestors.len(), 1);
        let ancestor = &status.ancestors[0];
        assert_condition(&ancestor.conditions, conditions::ACCEPTED, true, reasons::VALID);
        assert_condition(&ancestor.conditions, conditions::ATTACHED, true, reasons::ATTACHED);
    }
}

#[test]
fn route_policies_follow_attachment() {
    let test = TestConfig::new();
    test.inputs.http_routes.apply(mk_http_route(
        "default",
        "r",
        &[],
        vec![mk_parent("default", "gw", None)],
        vec![mk_rule(vec![], vec![])],
    ));
    test.inputs
        .traffic_policies
        .apply(rbac_policy("p", 1000, vec![target("HTTPRoute", "r")], "GET"));
    test.flush();

    // The route exists but is not attached, so no gateway receives the policy.
    assert!(policies(&test).is_empty());

    test.inputs.gateways.apply(mk_gateway(
        "default",
        "gw",
        CLASS,
        vec![mk_listener("http", 80, "HTTP")],
    ));
    test.flush();

    let gateways = policies(&test)
        .into_iter()
        .map(|(gw, _)| gw)
        .collect::<Vec<_>>();
    assert_eq!(gateways, vec![Some(NamespacedName::new("default", "gw"))]);
}

#[test]
fn missing_target_is_pending() {
    let test = TestConfig::new();
    test.inputs
        .traffic_policies
        .apply(rbac_policy("p", 1000, vec![target("HTTPRoute", "nope")], "GET"));
    test.flush();

    assert!(policies(&test).is_empty());
    let status = test.policy_status(GroupKind::TRAFFIC_POLICY, "default", "p");
    let ancestor = &status.ancestors[0];
    assert_condition(&ancestor.conditions, conditions::ACCEPTED, true, reasons::VALID);
    assert_condition(&ancestor.conditions, conditions::ATTACHED, false, reasons::PENDING);
}

#[test]
fn unsupported_target_kind_is_rejected() {
    let test = TestConfig::new();
    test.inputs.services.apply(mk_service("default", "svc", 8080));
    let svc = LocalPolicyTargetReference {
        group: String::new(),
        kind: "Service".to_string(),
        name: "svc".to_string(),
        section_name: None,
    };
    test.inputs
        .traffic_policies
        .apply(rbac_policy("p", 1000, vec![svc], "GET"));
    test.flush();

    assert!(policies(&test).is_empty());
    let status = test.policy_status(GroupKind::TRAFFIC_POLICY, "default", "p");
    let ancestor = &status.ancestors[0];
    assert_eq!(ancestor.ancestor_ref.kind, GroupKind::SERVICE);
    assert_condition(&ancestor.conditions, conditions::ACCEPTED, false, reasons::INVALID);
    assert_condition(&ancestor.conditions, conditions::ATTACHED, false, reasons::PENDING);
}

#[test]
fn ancestors_are_capped() {
    let test = TestConfig::new();
    let targets = (0..17)
        .map(|i| target("Gateway", &format!("gw-{i:02}")))
        .collect();
    test.inputs
        .traffic_policies
        .apply(rbac_policy("p", 1000, targets, "GET"));
    test.flush();

    let status = test.policy_status(GroupKind::TRAFFIC_POLICY, "default", "p");
    assert_eq!(status.ancestors.len(), 16);
    assert_eq!(status.ancestors[14].ancestor_ref.name, "gw-14");
    let summary = &status.ancestors[15];
    assert_eq!(summary.ancestor_ref.name, "StatusSummary");
    assert_condition(
        &summary.conditions,
        conditions::ACCEPTED,
        true,
        reasons::ANCESTOR_LIMIT_REACHED,
    );
    assert_eq!(
        summary.conditions[0].message,
        "2 additional ancestors were not reported"
    );
}

#[test]
fn listener_policy_targets_gateway() {
    let test = TestConfig::new();
    test.inputs.gateways.apply(mk_gateway(
        "default",
        "gw",
        CLASS,
        vec![mk_listener("http", 80, "HTTP")],
    ));
    test.inputs.listener_policies.apply(HttpListenerPolicy {
        metadata: mk_meta("default", "logs"),
        spec: HttpListenerPolicySpec {
            target_refs: vec![target("Gateway", "gw")],
            access_log: vec![ApiAccessLog {
                path: None,
                format: Some("json".to_string()),
            }],
            ..Default::default()
        },
        status: None,
    });
    test.flush();

    assert_eq!(
        policies(&test),
        vec![(
            Some(NamespacedName::new("default", "gw")),
            Policy {
                name: "gateway/default/gw/listener".to_string(),
                target: PolicyTarget::Gateway(NamespacedName::new("default", "gw")),
                spec: PolicySpec::ListenerSettings(ListenerSettings {
                    access_log: Some(AccessLog {
                        path: "/dev/stdout".to_string(),
                        format: Some("json".to_string()),
                    }),
                    ..Default::default()
                }),
            }
        )]
    );
}

#[test]
fn invalid_listener_policy_is_reported() {
    let test = TestConfig::new();
    test.inputs.gateways.apply(mk_gateway(
        "default",
        "gw",
        CLASS,
        vec![mk_listener("http", 80, "HTTP")],
    ));
    test.inputs.listener_policies.apply(HttpListenerPolicy {
        metadata: mk_meta("default", "bad"),
        spec: HttpListenerPolicySpec {
            target_refs: vec![target("Gateway", "gw")],
            server_header_transformation: Some("Replace".to_string()),
            ..Default::default()
        },
        status: None,
    });
    test.flush();

    assert!(policies(&test).is_empty());
    let status = test.policy_status(GroupKind::HTTP_LISTENER_POLICY, "default", "bad");
    let ancestor = &status.ancestors[0];
    assert_condition(&ancestor.conditions, conditions::ACCEPTED, true, reasons::INVALID);
    assert_condition(&ancestor.conditions, conditions::ATTACHED, false, reasons::PENDING);
}
