use crate::SnapshotError;
use agentgateway_controller_core::{
    agent::{AddressResource, AgentResource, Route},
    NamespacedName,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const RESOURCE_TYPE_URL: &str = "type.googleapis.com/agentgateway.dev.resource.Resource";
pub const ADDRESS_TYPE_URL: &str = "type.googleapis.com/istio.workload.Address";

/// Everything a single gateway's agents are configured with.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentSnapshot {
    pub resources: Resources<AgentResource>,
    pub addresses: Resources<AddressResource>,
    /// Per-item versions for delta protocols, by type URL and item name.
    pub version_map: BTreeMap<&'static str, BTreeMap<String, String>>,
}

/// A versioned set of items of one type.
#[derive(Clone, Debug, PartialEq)]
pub struct Resources<T> {
    /// A content hash over all items.
    pub version: String,
    pub items: BTreeMap<String, T>,
}

/// Formats the node id agents of a gateway connect with.
pub fn node_id(gateway: &NamespacedName) -> String {
    format!("{}~{}", gateway.namespace, gateway.name)
}

pub fn parse_node_id(id: &str) -> Option<NamespacedName> {
    let (ns, name) = id.split_once('~')?;
    if ns.is_empty() || name.is_empty() {
        return None;
    }
    Some(NamespacedName::new(ns, name))
}

/// Hashes the serialized form of a single item.
pub fn resource_version<T: Serialize>(item: &T) -> Result<String, SnapshotError> {
    let bytes = serde_json::to_vec(item).map_err(SnapshotError::Serialize)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

// === impl AgentSnapshot ===

impl AgentSnapshot {
    pub fn new(
        resources: BTreeMap<String, AgentResource>,
        addresses: BTreeMap<String, AddressResource>,
    ) -> Result<Self, SnapshotError> {
        let (resources, resource_versions) = Resources::new(resources)?;
        let (addresses, address_versions) = Resources::new(addresses)?;
        let mut version_map = BTreeMap::new();
        version_map.insert(RESOURCE_TYPE_URL, resource_versions);
        version_map.insert(ADDRESS_TYPE_URL, address_versions);
        Ok(Self {
            resources,
            addresses,
            version_map,
        })
    }

    /// Two snapshots with equal versions have identical content.
    pub fn version(&self) -> (&str, &str) {
        (&self.resources.version, &self.addresses.version)
    }

    /// Groups HTTP routes by the listener and hostname they serve, each group
    /// in matching order.
    pub fn virtual_hosts(&self) -> BTreeMap<(&str, &str), Vec<&Route>> {
        let mut hosts = BTreeMap::<_, Vec<&Route>>::new();
        for resource in self.resources.items.values() {
            if let AgentResource::Route(route) = resource {
                for hostname in &route.hostnames {
                    hosts
                        .entry((route.listener_key.as_str(), hostname.as_str()))
                        .or_default()
                        .push(route);
                }
            }
        }
        for routes in hosts.values_mut() {
            routes.sort_by(|a, b| a.cmp_precedence(b));
        }
        hosts
    }
}

// === impl Resources ===

impl<T: Serialize> Resources<T> {
    fn new(items: BTreeMap<String, T>) -> Result<(Self, BTreeMap<String, String>), SnapshotError> {
        let mut hasher = Sha256::new();
        let mut versions = BTreeMap::new();
        for (name, item) in &items {
            let version = resource_version(item)?;
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(version.as_bytes());
            versions.insert(name.clone(), version);
        }
        let version = hex::encode(hasher.finalize());
        Ok((Self { version, items }, versions))
    }
}

impl<T> Resources<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgateway_controller_core::agent::{Bind, PathMatch, RouteMatch};
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    fn bind(port: u16) -> AgentResource {
        AgentResource::Bind(Bind {
            key: format!("{port}/default/gw"),
            port,
        })
    }

    fn route(key: &str, hostnames: &[&str], path: PathMatch) -> AgentResource {
        AgentResource::Route(Route {
            key: key.to_string(),
            listener_key: "default/gw-kgw-http".to_string(),
            route_name: key.to_string(),
            rule_name: String::new(),
            hostnames: hostnames.iter().map(|h| h.to_string()).collect(),
            matches: vec![RouteMatch {
                path,
                ..Default::default()
            }],
            filters: vec![],
            backends: vec![],
            timeouts: None,
            creation_timestamp: None,
        })
    }

    #[test]
    fn node_ids() {
        let gw = NamespacedName::new("default", "gw");
        assert_eq!(node_id(&gw), "default~gw");
        assert_eq!(parse_node_id("default~gw"), Some(gw));
        assert_eq!(parse_node_id("default/gw"), None);
        assert_eq!(parse_node_id("~gw"), None);
    }

    #[test]
    fn versions_follow_content() {
        let a = AgentSnapshot::new(btreemap! { "bind/80".to_string() => bind(80) }, btreemap! {})
            .expect("snapshot");
        let b = AgentSnapshot::new(btreemap! { "bind/80".to_string() => bind(80) }, btreemap! {})
            .expect("snapshot");
        assert_eq!(a.version(), b.version());

        let c = AgentSnapshot::new(btreemap! { "bind/81".to_string() => bind(81) }, btreemap! {})
            .expect("snapshot");
        assert_ne!(a.resources.version, c.resources.version);
        assert_eq!(a.addresses.version, c.addresses.version);

        let versions = &a.version_map[RESOURCE_TYPE_URL];
        assert_eq!(
            versions["bind/80"],
            resource_version(&bind(80)).expect("version")
        );
        assert!(a.version_map[ADDRESS_TYPE_URL].is_empty());
    }

    #[test]
    fn virtual_hosts_are_ordered_by_precedence() {
        let snapshot = AgentSnapshot::new(
            btreemap! {
                "route/a".to_string() => route("a", &["*"], PathMatch::Prefix("/".to_string())),
                "route/b".to_string() => route("b", &["*", "foo.example.com"], PathMatch::Exact("/login".to_string())),
                "route/c".to_string() => route("c", &["*"], PathMatch::Prefix("/api".to_string())),
            },
            btreemap! {},
        )
        .expect("snapshot");

        let hosts = snapshot
            .virtual_hosts()
            .into_iter()
            .map(|((listener, host), routes)| {
                let keys = routes.iter().map(|r| r.key.as_str()).collect::<Vec<_>>();
                (format!("{listener} {host}"), keys.join(","))
            })
            .collect::<BTreeMap<_, _>>();
        assert_eq!(
            hosts,
            btreemap! {
                "default/gw-kgw-http *".to_string() => "b,c,a".to_string(),
                "default/gw-kgw-http foo.example.com".to_string() => "b".to_string(),
            }
        );
    }
}
