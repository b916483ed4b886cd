use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    patches: Family<PatchLabels, Counter>,
}

/// What happened to a single queued status update.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Applied,
    Unchanged,
    Stale,
    Deleted,
    Failed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PatchLabels {
    kind: String,
    result: &'static str,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let patches = Family::default();
        prom.register(
            "status_patches",
            "Count of status updates by outcome",
            patches.clone(),
        );
        Self { patches }
    }

    pub(crate) fn record(&self, kind: &str, outcome: Outcome) {
        self.patches
            .get_or_create(&PatchLabels {
                kind: kind.to_string(),
                result: outcome.as_str(),
            })
            .inc();
    }
}

// === impl Outcome ===

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
            Self::Stale => "stale",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
        }
    }
}
