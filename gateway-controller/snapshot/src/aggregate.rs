use crate::{node_id, AgentSnapshot, SnapshotCache};
use agentgateway_controller_core::{
    agent::{AddressResource, AgentResource, Output},
    NamespacedName,
};
use agentgateway_controller_krt::{Collection, Event};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

/// Groups translated output by gateway and keeps the gateway's snapshot in
/// `cache` current.
///
/// Snapshots are rebuilt only for gateways whose inputs changed in a batch.
pub fn publish(outputs: &Collection<Output>, cache: SnapshotCache) {
    let state = Mutex::new(State::default());
    outputs.subscribe(move |events| {
        let mut state = state.lock();
        let dirty = state.apply(events);
        let changes = dirty
            .into_iter()
            .filter_map(|gw| {
                let id = node_id(&gw);
                if !state.gateways.contains(&gw) {
                    return Some((id, None));
                }
                match state.snapshot(&gw) {
                    Ok(snapshot) => Some((id, Some(snapshot))),
                    Err(error) => {
                        tracing::error!(gateway = %gw, %error, "Failed to build snapshot");
                        None
                    }
                }
            })
            .collect::<Vec<_>>();
        cache.update(changes);
    });
}

#[derive(Debug, Default)]
struct State {
    gateways: BTreeSet<NamespacedName>,
    scoped: BTreeMap<NamespacedName, BTreeMap<String, AgentResource>>,
    shared: BTreeMap<String, AgentResource>,
    addresses: BTreeMap<String, AddressResource>,
}

// === impl State ===

impl State {
    /// Applies a batch of changes, returning the gateways whose snapshots
    /// may have changed.
    fn apply(&mut self, events: &[Event<Output>]) -> BTreeSet<NamespacedName> {
        let mut dirty = BTreeSet::new();
        let mut all = false;
        for event in events {
            let (old, new) = match event {
                Event::Added { new, .. } => (None, Some(new)),
                Event::Updated { old, new, .. } => (Some(old), Some(new)),
                Event::Deleted { old, .. } => (Some(old), None),
            };
            if let Some(old) = old {
                all |= self.remove(old, &mut dirty);
            }
            if let Some(new) = new {
                all |= self.insert(new, &mut dirty);
            }
        }
        if all {
            dirty.extend(self.gateways.iter().cloned());
        }
        dirty
    }

    fn insert(&mut self, output: &Output, dirty: &mut BTreeSet<NamespacedName>) -> bool {
        match output {
            Output::Gateway(gw) => {
                self.gateways.insert(gw.clone());
                dirty.insert(gw.clone());
                false
            }
            Output::Resource {
                gateway: Some(gw),
                resource,
            } => {
                self.scoped
                    .entry(gw.clone())
                    .or_default()
                    .insert(item_name(resource), resource.clone());
                dirty.insert(gw.clone());
                false
            }
            Output::Resource {
                gateway: None,
                resource,
            } => {
                self.shared.insert(item_name(resource), resource.clone());
                true
            }
            Output::Address(addr) => {
                self.addresses.insert(addr.name(), addr.clone());
                true
            }
        }
    }

    fn remove(&mut self, output: &Output, dirty: &mut BTreeSet<NamespacedName>) -> bool {
        match output {
            Output::Gateway(gw) => {
                self.gateways.remove(gw);
                dirty.insert(gw.clone());
                false
            }
            Output::Resource {
                gateway: Some(gw),
                resource,
            } => {
                if let Some(resources) = self.scoped.get_mut(gw) {
                    resources.remove(&item_name(resource));
                    if resources.is_empty() {
                        self.scoped.remove(gw);
                    }
                }
                dirty.insert(gw.clone());
                false
            }
            Output::Resource {
                gateway: None,
                resource,
            } => {
                self.shared.remove(&item_name(resource));
                true
            }
            Output::Address(addr) => {
                self.addresses.remove(&addr.name());
                true
            }
        }
    }

    fn snapshot(&self, gw: &NamespacedName) -> Result<AgentSnapshot, crate::SnapshotError> {
        let mut resources = self.shared.clone();
        if let Some(scoped) = self.scoped.get(gw) {
            resources.extend(scoped.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        AgentSnapshot::new(resources, self.addresses.clone())
    }
}

fn item_name(resource: &AgentResource) -> String {
    format!("{}/{}", resource.type_name(), resource.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SnapshotEvent;
    use agentgateway_controller_core::agent::{Bind, ServiceAddress};
    use agentgateway_controller_krt::{Keyed, Runtime};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn bind(gw: &NamespacedName, port: u16) -> Output {
        Output::Resource {
            gateway: Some(gw.clone()),
            resource: AgentResource::Bind(Bind {
                key: format!("{port}/{gw}"),
                port,
            }),
        }
    }

    fn address(name: &str) -> Output {
        Output::Address(AddressResource::Service(ServiceAddress {
            namespace: "default".to_string(),
            name: name.to_string(),
            hostname: format!("{name}.default.svc.cluster.local"),
            vips: vec![],
            ports: Default::default(),
            ip_families: vec![],
            internal_traffic_policy: None,
            publish_not_ready_addresses: false,
        }))
    }

    fn recorded(cache: &SnapshotCache) -> Arc<Mutex<Vec<Vec<SnapshotEvent>>>> {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let recorder = batches.clone();
        cache.subscribe(move |events| recorder.lock().push(events.to_vec()));
        batches
    }

    #[test]
    fn snapshots_per_gateway() {
        let rt = Runtime::default();
        let outputs = rt.input::<Output>("outputs");
        let cache = SnapshotCache::default();
        let batches = recorded(&cache);
        publish(&outputs.collection(), cache.clone());

        let a = NamespacedName::new("default", "a");
        let b = NamespacedName::new("default", "b");
        outputs.apply(Output::Gateway(a.clone()));
        outputs.apply(Output::Gateway(b.clone()));
        outputs.apply(bind(&a, 80));
        outputs.apply(address("svc"));
        rt.flush();

        assert_eq!(cache.get_status_keys(), vec!["default~a", "default~b"]);
        assert_eq!(
            batches.lock().drain(..).collect::<Vec<_>>(),
            vec![vec![
                SnapshotEvent::Added("default~a".to_string()),
                SnapshotEvent::Added("default~b".to_string()),
            ]]
        );
        let snapshot = cache.get_snapshot("default~a").expect("snapshot");
        assert_eq!(
            snapshot.resources.items.keys().collect::<Vec<_>>(),
            vec!["bind/80/default/a"]
        );
        assert_eq!(snapshot.addresses.len(), 1);
        assert!(cache
            .get_snapshot("default~b")
            .expect("snapshot")
            .resources
            .is_empty());

        // Only the gateway whose resources changed is updated.
        outputs.apply(bind(&a, 443));
        rt.flush();
        assert_eq!(
            batches.lock().drain(..).collect::<Vec<_>>(),
            vec![vec![SnapshotEvent::Updated("default~a".to_string())]]
        );

        // Shared addresses reach every gateway.
        outputs.delete(address("svc").key());
        rt.flush();
        assert_eq!(
            batches.lock().drain(..).collect::<Vec<_>>(),
            vec![vec![
                SnapshotEvent::Updated("default~a".to_string()),
                SnapshotEvent::Updated("default~b".to_string()),
            ]]
        );

        outputs.delete(Output::Gateway(b).key());
        rt.flush();
        assert_eq!(
            batches.lock().drain(..).collect::<Vec<_>>(),
            vec![vec![SnapshotEvent::Deleted("default~b".to_string())]]
        );
        assert_eq!(cache.get_status_keys(), vec!["default~a"]);
    }

    #[test]
    fn resources_without_gateway_are_not_published() {
        let rt = Runtime::default();
        let outputs = rt.input::<Output>("outputs");
        let cache = SnapshotCache::default();
        publish(&outputs.collection(), cache.clone());

        let gw = NamespacedName::new("default", "gw");
        outputs.apply(bind(&gw, 80));
        rt.flush();
        assert!(cache.get_status_keys().is_empty());

        outputs.apply(Output::Gateway(gw));
        rt.flush();
        let snapshot = cache.get_snapshot("default~gw").expect("snapshot");
        assert_eq!(snapshot.resources.len(), 1);
    }
}
