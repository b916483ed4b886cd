//! Per-gateway configuration snapshots.
//!
//! Translated output is grouped by the gateway that receives it and published
//! to a [`SnapshotCache`] keyed by node id. Each snapshot carries content
//! hashes so that unchanged configuration is never re-announced.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod aggregate;
mod cache;
mod error;
mod metrics;
mod snapshot;

pub use self::{
    aggregate::publish,
    cache::{SnapshotCache, SnapshotEvent, SnapshotStream},
    error::SnapshotError,
    metrics::SnapshotMetrics,
    snapshot::{
        node_id, parse_node_id, resource_version, AgentSnapshot, Resources, ADDRESS_TYPE_URL,
        RESOURCE_TYPE_URL,
    },
};
