use super::*;
use agentgateway_controller_core::{
    agent::{Bind, ListenerProtocol},
    status::{conditions, reasons},
};
use agentgateway_controller_k8s_api::gateway::{GatewayTlsConfig, SecretObjectReference};
use maplit::btreemap;
use pretty_assertions::assert_eq;

fn https_listener(name: &str, secret: &str) -> Listener {
    Listener {
        tls: Some(GatewayTlsConfig {
            mode: None,
            certificate_refs: vec![SecretObjectReference {
                name: secret.to_string(),
                ..Default::default()
            }],
            options: Default::default(),
        }),
        ..mk_listener(name, 443, "HTTPS")
    }
}

fn mk_tls_secret(ns: &str, name: &str) -> k8s::Secret {
    let key = rcgen::KeyPair::generate().expect("key pair");
    let cert = rcgen::CertificateParams::new(vec!["example.com".to_string()])
        .expect("params")
        .self_signed(&key)
        .expect("certificate");
    k8s::Secret {
        metadata: mk_meta(ns, name),
        data: Some(btreemap! {
            "tls.crt".to_string() => k8s::ByteString(cert.pem().into_bytes()),
            "tls.key".to_string() => k8s::ByteString(key.serialize_pem().into_bytes()),
        }),
        ..Default::default()
    }
}

#[test]
fn gateway_class_is_accepted() {
    let test = TestConfig::new();
    test.inputs
        .gateway_classes
        .apply(mk_gateway_class("other", "example.com/other"));
    test.flush();

    let status = test
        .outputs
        .gateway_class_statuses
        .get(CLASS)
        .expect("class status");
    assert_condition(&status.conditions, conditions::ACCEPTED, true, reasons::ACCEPTED);
    assert!(test.outputs.gateway_class_statuses.get("other").is_none());
}

#[test]
fn http_listener_is_programmed() {
    let test = TestConfig::new();
    test.inputs.gateways.apply(mk_gateway(
        "default",
        "gw",
        CLASS,
        vec![mk_listener("http", 80, "HTTP")],
    ));
    test.flush();

    let keys = test.resource_keys();
    assert!(keys.contains(&"gateway/default/gw".to_string()), "{keys:?}");
    assert!(
        keys.contains(&"resource/default/gw/bind/80/default/gw".to_string()),
        "{keys:?}"
    );
    assert!(
        keys.contains(&"resource/default/gw/listener/default/gw-kgw-http".to_string()),
        "{keys:?}"
    );

    let status = test.gateway_status("default", "gw");
    assert_condition(&status.conditions, conditions::ACCEPTED, true, reasons::ACCEPTED);
    assert_condition(&status.conditions, conditions::PROGRAMMED, true, reasons::PROGRAMMED);
    assert_eq!(status.listeners.len(), 1);
    assert_eq!(status.listeners[0].attached_routes, 0);
    assert_eq!(
        status.listeners[0].supported_kinds,
        vec![GroupKind::HTTP_ROUTE, GroupKind::GRPC_ROUTE]
    );
}

#[test]
fn gateways_of_other_classes_are_ignored() {
    let test = TestConfig::new();
    test.inputs.gateways.apply(mk_gateway(
        "default",
        "gw",
        "someone-else",
        vec![mk_listener("http", 80, "HTTP")],
    ));
    test.flush();

    assert!(test.resource_keys().is_empty());
    assert!(test.outputs.gateway_statuses.get("default/gw").is_none());
}

#[test]
fn listener_tls_missing() {
    let test = TestConfig::new();
    test.inputs.gateways.apply(mk_gateway(
        "default",
        "gw",
        CLASS,
        vec![https_listener("https", "missing")],
    ));
    test.inputs.http_routes.apply(mk_http_route(
        "default",
        "r",
        &[],
        vec![mk_parent("default", "gw", Some("https"))],
        vec![mk_rule(vec![], vec![])],
    ));
    test.flush();

    let status = test.gateway_status("default", "gw");
    let listener = &status.listeners[0];
    assert_condition(
        &listener.conditions,
        conditions::RESOLVED_REFS,
        false,
        "InvalidCertificateRef",
    );
    assert_condition(&listener.conditions, conditions::PROGRAMMED, false, reasons::INVALID);
    assert_condition(&status.conditions, conditions::PROGRAMMED, false, reasons::INVALID);

    // No listener is bound, so routes cannot attach to it.
    assert!(!test
        .resource_keys()
        .iter()
        .any(|k| k.contains("/listener/")));
    let parent = test.http_route_parent("default", "r");
    assert_condition(
        &parent.conditions,
        conditions::ACCEPTED,
        false,
        reasons::NO_MATCHING_PARENT,
    );
}

#[test]
fn listener_tls_resolves_secret() {
    let test = TestConfig::new();
    test.inputs.secrets.apply(mk_tls_secret("default", "cert"));
    test.inputs.gateways.apply(mk_gateway(
        "default",
        "gw",
        CLASS,
        vec![https_listener("https", "cert")],
    ));
    test.flush();

    let status = test.gateway_status("default", "gw");
    assert_condition(
        &status.listeners[0].conditions,
        conditions::PROGRAMMED,
        true,
        reasons::PROGRAMMED,
    );
    let listener = test
        .resources()
        .iter()
        .find_map(|o| match &**o {
            Output::Resource {
                resource: AgentResource::Listener(l),
                ..
            } => Some(l.clone()),
            _ => None,
        })
        .expect("listener");
    assert_eq!(listener.protocol, ListenerProtocol::Https);
    assert!(listener.tls.is_some());
}

#[test]
fn cross_namespace_secret_requires_grant() {
    let test = TestConfig::new();
    test.inputs.secrets.apply(mk_tls_secret("certs", "cert"));
    let mut listener = https_listener("https", "cert");
    if let Some(tls) = listener.tls.as_mut() {
        tls.certificate_refs[0].namespace = Some("certs".to_string());
    }
    test.inputs
        .gateways
        .apply(mk_gateway("default", "gw", CLASS, vec![listener]));
    test.flush();

    let status = test.gateway_status("default", "gw");
    assert_condition(
        &status.listeners[0].conditions,
        conditions::RESOLVED_REFS,
        false,
        "RefNotPermitted",
    );

    test.inputs.reference_grants.apply(k8s::ReferenceGrant {
        metadata: mk_meta("certs", "allow-gateways"),
        spec: k8s::reference_grant::ReferenceGrantSpec {
            from: vec![k8s::reference_grant::ReferenceGrantFrom {
                group: "gateway.networking.k8s.io".to_string(),
                kind: "Gateway".to_string(),
                namespace: "default".to_string(),
            }],
            to: vec![k8s::reference_grant::ReferenceGrantTo {
                group: String::new(),
                kind: "Secret".to_string(),
                name: None,
            }],
        },
    });
    test.flush();

    let status = test.gateway_status("default", "gw");
    assert_condition(
        &status.listeners[0].conditions,
        conditions::PROGRAMMED,
        true,
        reasons::PROGRAMMED,
    );
}

#[test]
fn conflicting_protocols_on_a_port() {
    let test = TestConfig::new();
    test.inputs.gateways.apply(mk_gateway(
        "default",
        "gw",
        CLASS,
        vec![mk_listener("http", 8080, "HTTP"), mk_listener("tcp", 8080, "TCP")],
    ));
    test.flush();

    let status = test.gateway_status("default", "gw");
    for l in &status.listeners {
        assert_condition(
            &l.conditions,
            conditions::CONFLICTED,
            true,
            reasons::PROTOCOL_CONFLICT,
        );
    }
    assert_condition(&status.conditions, conditions::PROGRAMMED, false, reasons::INVALID);
}

#[test]
fn listeners_share_binds_per_port() {
    let test = TestConfig::new();
    let mut a = mk_listener("a", 80, "HTTP");
    a.hostname = Some("a.example.com".to_string());
    let mut b = mk_listener("b", 80, "HTTP");
    b.hostname = Some("b.example.com".to_string());
    test.inputs
        .gateways
        .apply(mk_gateway("default", "gw", CLASS, vec![a, b]));
    test.flush();

    let binds = test
        .resources()
        .iter()
        .filter_map(|o| match &**o {
            Output::Resource {
                resource: AgentResource::Bind(b),
                ..
            } => Some(b.clone()),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(
        binds,
        vec![Bind {
            key: "80/default/gw".to_string(),
            port: 80,
        }]
    );
}

#[test]
fn waypoint_gateway() {
    let test = TestConfig::new();
    test.inputs
        .gateways
        .apply(mk_gateway("a", "wp", "istio-waypoint", vec![]));
    test.inputs.services.apply(mk_service("a", "svc", 8080));
    test.inputs.http_routes.apply(mk_http_route(
        "a",
        "r",
        &[],
        vec![mk_parent("a", "wp", None)],
        vec![mk_rule(vec![], vec![mk_backend(None, "svc", 8080)])],
    ));
    test.flush();

    let keys = test.resource_keys();
    assert!(
        keys.contains(&"resource/a/wp/bind/waypoint/a/wp".to_string()),
        "{keys:?}"
    );
    let listener = test
        .resources()
        .iter()
        .find_map(|o| match &**o {
            Output::Resource {
                resource: AgentResource::Listener(l),
                ..
            } => Some(l.clone()),
            _ => None,
        })
        .expect("listener");
    assert_eq!(listener.key, "waypoint/a/wp");
    assert_eq!(listener.protocol, ListenerProtocol::Hbone);

    assert!(test.routes().is_empty());
    let parent = test.http_route_parent("a", "r");
    assert_condition(
        &parent.conditions,
        conditions::ACCEPTED,
        false,
        reasons::NO_MATCHING_PARENT,
    );
}

#[test]
fn deleting_a_gateway_removes_its_resources() {
    let test = TestConfig::new();
    test.inputs.services.apply(mk_service("default", "svc", 8080));
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
        vec![mk_rule(vec![], vec![mk_backend(None, "svc", 8080)])],
    ));
    test.flush();
    assert_eq!(test.routes().len(), 1);

    test.inputs.gateways.delete("default/gw");
    test.flush();

    assert!(
        !test.resource_keys().iter().any(|k| k.contains("default/gw")),
        "{:?}",
        test.resource_keys()
    );
    let parent = test.http_route_parent("default", "r");
    assert_condition(
        &parent.conditions,
        conditions::ACCEPTED,
        false,
        reasons::NO_MATCHING_PARENT,
    );
}
