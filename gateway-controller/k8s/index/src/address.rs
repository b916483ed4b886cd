use crate::Lookups;
use agentgateway_controller_core::agent::{AddressResource, Output, ServiceAddress};
use agentgateway_controller_k8s_api::{self as k8s, IntOrString, ResourceExt};
use agentgateway_controller_krt::{Collection, Runtime};
use std::collections::BTreeMap;

/// Translates Services into the addresses gateways use to reach them.
pub(crate) fn build(rt: &Runtime, lookups: &Lookups) -> Collection<Output> {
    let config = lookups.config.clone();
    rt.map("addresses/services", &lookups.services, move |_, svc: &k8s::Service| {
        let ns = svc.namespace()?;
        let name = svc.name_any();
        let hostname = config.service_hostname(&ns, &name);
        Some(Output::Address(AddressResource::Service(service_address(
            &config.cluster_id,
            ns,
            name,
            hostname,
            svc.spec.as_ref()?,
        ))))
    })
}

fn service_address(
    cluster_id: &str,
    namespace: String,
    name: String,
    hostname: String,
    spec: &k8s::ServiceSpec,
) -> ServiceAddress {
    let vips = spec
        .cluster_ips
        .iter()
        .flatten()
        .chain(spec.cluster_ip.iter())
        .filter(|ip| !ip.is_empty() && ip.as_str() != "None")
        .map(|ip| format!("{cluster_id}/{ip}"))
        .fold(Vec::new(), |mut vips, vip| {
            if !vips.contains(&vip) {
                vips.push(vip);
            }
            vips
        });

    let ports = spec
        .ports
        .iter()
        .flatten()
        .filter_map(|p| {
            let port = u16::try_from(p.port).ok()?;
            Some((port, target_port(p)))
        })
        .collect::<BTreeMap<_, _>>();

    ServiceAddress {
        namespace,
        name,
        hostname,
        vips,
        ports,
        ip_families: spec.ip_families.clone().unwrap_or_default(),
        internal_traffic_policy: spec.internal_traffic_policy.clone(),
        publish_not_ready_addresses: spec.publish_not_ready_addresses.unwrap_or(false),
    }
}

/// Named target ports are resolved per endpoint and are reported as `0`.
fn target_port(p: &k8s::ServicePort) -> u16 {
    match &p.target_port {
        Some(IntOrString::Int(port)) => u16::try_from(*port).unwrap_or(0),
        Some(IntOrString::String(_)) => 0,
        None => u16::try_from(p.port).unwrap_or(0),
    }
}
