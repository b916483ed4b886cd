use agentgateway_controller_core::{
    agent::{AgentResource, Output},
    policy::{Policy, PolicySpec, PolicyTarget},
    NamespacedName, ObjectSource,
};
use agentgateway_controller_krt::{Collection, Key, Keyed, Runtime};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One policy's spec of one kind, attached to one target.
#[derive(Clone, Debug, PartialEq)]
pub(super) struct Contribution {
    pub(super) policy: ObjectSource,
    pub(super) order: Order,
    pub(super) target: PolicyTarget,
    /// The gateways that receive the merged policy; `None` when it is
    /// distributed to every gateway.
    pub(super) gateways: Option<Vec<NamespacedName>>,
    pub(super) spec: PolicySpec,
}

/// Older policies take precedence; ties are broken by namespace and name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(super) struct Order {
    pub(super) created: Option<DateTime<Utc>>,
    pub(super) namespace: String,
    pub(super) name: String,
}

/// Merges all contributions of the same kind on the same target into a
/// single policy.
pub(super) fn build(rt: &Runtime, contributions: &Collection<Contribution>) -> Collection<Output> {
    let by_group = rt.index("policies/by-target", contributions, |c| {
        vec![Key::from(c.group())]
    });
    rt.flat_map("policies/merged", contributions, move |ctx, c| {
        let group = c.group();
        let mut members = ctx.fetch_index(&by_group, &group);
        members.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.key().cmp(&b.key())));

        // Only the highest precedence member emits the merged policy.
        match members.first() {
            Some(first) if first.key() == c.key() => {}
            _ => return vec![],
        }
        merge(group, &members)
    })
}

fn merge(name: String, members: &[Arc<Contribution>]) -> Vec<Output> {
    let Some((first, rest)) = members.split_first() else {
        return vec![];
    };
    let mut spec = first.spec.clone();
    for m in rest {
        if !spec.try_merge(m.spec.clone()) {
            tracing::warn!(policy = %m.policy, %name, "Skipping policy of mismatched kind");
        }
    }

    let policy = Policy {
        name,
        target: first.target.clone(),
        spec,
    };
    match &first.gateways {
        None => vec![Output::Resource {
            gateway: None,
            resource: AgentResource::Policy(policy),
        }],
        Some(gateways) => gateways
            .iter()
            .map(|gw| Output::Resource {
                gateway: Some(gw.clone()),
                resource: AgentResource::Policy(policy.clone()),
            })
            .collect(),
    }
}

// === impl Contribution ===

impl Contribution {
    /// Contributions sharing a group are merged together.
    fn group(&self) -> String {
        format!("{}/{}", self.target, self.spec.kind())
    }
}

impl Keyed for Contribution {
    fn key(&self) -> Key {
        Key::from(format!("{}/{}", self.group(), self.policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgateway_controller_core::{policy::Timeout, GroupKind};
    use std::time::Duration;

    fn contribution(name: &str, secs: u64, gateways: Option<Vec<NamespacedName>>) -> Arc<Contribution> {
        Arc::new(Contribution {
            policy: ObjectSource::new(GroupKind::TRAFFIC_POLICY, Some("ns".into()), name),
            order: Order {
                created: None,
                namespace: "ns".into(),
                name: name.into(),
            },
            target: PolicyTarget::Gateway(NamespacedName::new("ns", "gw")),
            gateways,
            spec: PolicySpec::Timeout(Timeout {
                request: Some(Duration::from_secs(secs)),
                backend_request: None,
            }),
        })
    }

    #[test]
    fn merged_policy_is_emitted_per_gateway() {
        let gws = vec![NamespacedName::new("ns", "a"), NamespacedName::new("ns", "b")];
        let out = merge(
            "p".into(),
            &[contribution("x", 1, Some(gws.clone())), contribution("y", 2, Some(gws))],
        );
        assert_eq!(out.len(), 2);
        for o in out {
            let Output::Resource {
                gateway: Some(_),
                resource: AgentResource::Policy(p),
            } = o
            else {
                panic!("expected a gateway-scoped policy");
            };
            assert_eq!(
                p.spec,
                PolicySpec::Timeout(Timeout {
                    request: Some(Duration::from_secs(1)),
                    backend_request: None,
                })
            );
        }
    }

    #[test]
    fn global_targets_have_no_gateway() {
        let out = merge("p".into(), &[contribution("x", 1, None)]);
        assert!(matches!(
            out.as_slice(),
            [Output::Resource { gateway: None, .. }]
        ));
    }

    #[test]
    fn older_policies_sort_first() {
        let old = Order {
            created: DateTime::from_timestamp(10, 0),
            namespace: "z".into(),
            name: "z".into(),
        };
        let new = Order {
            created: DateTime::from_timestamp(20, 0),
            namespace: "a".into(),
            name: "a".into(),
        };
        assert!(old < new);
    }
}
