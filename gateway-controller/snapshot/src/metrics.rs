use crate::cache::SnapshotEvent;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct SnapshotMetrics {
    updates: Family<UpdateLabels, Counter>,
    index_size: Gauge,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct UpdateLabels {
    event: &'static str,
}

// === impl SnapshotMetrics ===

impl SnapshotMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let updates = Family::default();
        prom.register(
            "snapshot_updates",
            "Count of snapshot changes pushed to subscribers",
            updates.clone(),
        );

        let index_size = Gauge::default();
        prom.register(
            "snapshot_index_size",
            "Gauge of the number of gateways with a snapshot",
            index_size.clone(),
        );

        Self {
            updates,
            index_size,
        }
    }

    pub(crate) fn record(&self, events: &[SnapshotEvent], size: usize) {
        for event in events {
            let event = match event {
                SnapshotEvent::Added(_) => "added",
                SnapshotEvent::Updated(_) => "updated",
                SnapshotEvent::Deleted(_) => "deleted",
            };
            self.updates.get_or_create(&UpdateLabels { event }).inc();
        }
        self.index_size.set(size as i64);
    }
}
