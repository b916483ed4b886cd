//! An incremental, dependency-tracked collection runtime.
//!
//! A [`Runtime`] owns a graph of keyed collections. [`Input`]s are fed by an
//! external provider; derived collections ([`Runtime::map`],
//! [`Runtime::flat_map`], [`Runtime::join`], [`Runtime::status`]) recompute
//! only the outputs whose inputs changed. Transformations record every
//! collection they read through a [`HandlerContext`], so a change to a
//! fetched object recomputes exactly the outputs that fetched it.
//!
//! The graph is processed in creation order, which is always topological: a
//! collection can only be derived from collections that already exist.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod collection;
mod context;
mod derived;
mod index;
mod input;
mod join;
mod metrics;
mod protected;
mod runtime;

#[cfg(test)]
mod tests;

pub use self::{
    collection::{Collection, Event},
    context::HandlerContext,
    index::Index,
    input::Input,
    metrics::RuntimeMetrics,
    protected::RecomputeProtected,
    runtime::Runtime,
};

use std::{borrow::Borrow, fmt, sync::Arc};

/// A collection key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Arc<str>);

/// Types that can be stored in a collection.
///
/// Keys must be unique within a collection.
pub trait Keyed {
    fn key(&self) -> Key;
}

/// Kubernetes objects are keyed by `namespace/name`, or by `name` when
/// cluster-scoped.
impl<K> Keyed for K
where
    K: kube::Resource<DynamicType = ()>,
{
    fn key(&self) -> Key {
        let meta = self.meta();
        let name = meta.name.as_deref().unwrap_or_default();
        match meta.namespace.as_deref() {
            Some(ns) => Key::from(format!("{ns}/{name}")),
            None => Key::from(name),
        }
    }
}

// === impl Key ===

impl Key {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<&String> for Key {
    fn from(s: &String) -> Self {
        Self(s.as_str().into())
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}
