//! Authorizes cross-namespace references.
//!
//! A reference from an object in one namespace to an object in another is
//! only permitted when a ReferenceGrant in the target namespace allows the
//! referring kind and namespace to refer to the target kind (and, optionally,
//! name). References within a namespace are always permitted.

use agentgateway_controller_core::GroupKind;
use agentgateway_controller_k8s_api::{self as k8s, ResourceExt};
use agentgateway_controller_krt::{Collection, HandlerContext, Index, Key, Keyed, Runtime};

/// Answers whether a cross-namespace reference is permitted.
#[derive(Clone)]
pub struct ReferenceGrants {
    index: Index<Grant>,
}

/// A single `from` x `to` pair of a ReferenceGrant.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Grant {
    grant: String,
    from_idx: usize,
    to_idx: usize,
    from_kind: GroupKind,
    from_namespace: String,
    to_kind: GroupKind,
    to_namespace: String,
    to_name: Option<String>,
}

// === impl ReferenceGrants ===

impl ReferenceGrants {
    pub(crate) fn new(rt: &Runtime, grants: &Collection<k8s::ReferenceGrant>) -> Self {
        let pairs = rt.flat_map("referencegrants/pairs", grants, |_, rg| Grant::from_resource(rg));
        let index = rt.index("referencegrants/by-kind", &pairs, |g: &Grant| {
            vec![Key::from(index_key(
                &g.from_kind,
                &g.from_namespace,
                &g.to_kind,
                &g.to_namespace,
            ))]
        });
        Self { index }
    }

    /// Returns true if an object of `from` kind in `from_ns` may reference the
    /// Secret `ns/name`.
    pub fn secret_allowed(
        &self,
        ctx: &mut HandlerContext<'_>,
        from: (&GroupKind, &str),
        secret: (&str, &str),
    ) -> bool {
        self.allowed(ctx, from, (&GroupKind::SECRET, secret.0, secret.1))
    }

    /// Returns true if an object of `from` kind in `from_ns` may reference the
    /// backend `(kind, ns, name)`.
    pub fn backend_allowed(
        &self,
        ctx: &mut HandlerContext<'_>,
        from: (&GroupKind, &str),
        backend: (&GroupKind, &str, &str),
    ) -> bool {
        self.allowed(ctx, from, backend)
    }

    fn allowed(
        &self,
        ctx: &mut HandlerContext<'_>,
        (from_kind, from_ns): (&GroupKind, &str),
        (to_kind, to_ns, to_name): (&GroupKind, &str, &str),
    ) -> bool {
        if from_ns == to_ns {
            return true;
        }
        let key = index_key(from_kind, from_ns, to_kind, to_ns);
        ctx.fetch_index(&self.index, &key)
            .iter()
            .any(|g| g.to_name.as_deref().map_or(true, |n| n == to_name))
    }
}

fn index_key(from_kind: &GroupKind, from_ns: &str, to_kind: &GroupKind, to_ns: &str) -> String {
    format!("{from_kind}/{from_ns}/{to_kind}/{to_ns}")
}

// === impl Grant ===

impl Grant {
    fn from_resource(rg: &k8s::ReferenceGrant) -> Vec<Self> {
        let Some(ns) = rg.namespace() else {
            tracing::warn!(name = %rg.name_any(), "ReferenceGrant missing namespace");
            return vec![];
        };
        let grant = format!("{ns}/{}", rg.name_any());
        let mut pairs = Vec::with_capacity(rg.spec.from.len() * rg.spec.to.len());
        for (from_idx, from) in rg.spec.from.iter().enumerate() {
            for (to_idx, to) in rg.spec.to.iter().enumerate() {
                pairs.push(Self {
                    grant: grant.clone(),
                    from_idx,
                    to_idx,
                    from_kind: GroupKind::new(&from.group, &from.kind),
                    from_namespace: from.namespace.clone(),
                    to_kind: GroupKind::new(&to.group, &to.kind),
                    to_namespace: ns.clone(),
                    to_name: to.name.clone().filter(|n| !n.is_empty()),
                });
            }
        }
        pairs
    }
}

impl Keyed for Grant {
    fn key(&self) -> Key {
        Key::from(format!("{}/{}/{}", self.grant, self.from_idx, self.to_idx))
    }
}
