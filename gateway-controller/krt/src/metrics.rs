use prometheus_client::{metrics::counter::Counter, registry::Registry};

#[derive(Clone, Debug, Default)]
pub struct RuntimeMetrics {
    pub(crate) flushes: Counter,
    pub(crate) changed_keys: Counter,
}

impl RuntimeMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let flushes = Counter::default();
        reg.register(
            "flushes",
            "Count of times pending input changes were processed",
            flushes.clone(),
        );

        let changed_keys = Counter::default();
        reg.register(
            "changed_keys",
            "Count of collection keys whose values changed",
            changed_keys.clone(),
        );

        Self {
            flushes,
            changed_keys,
        }
    }
}
