use crate::{context::HandlerContext, input::Input, Key, Keyed};
use parking_lot::RwLock;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// A value updated outside of the collection graph.
///
/// Writes through [`RecomputeProtected::update`] are not observed by
/// transformations until [`RecomputeProtected::mark_dirty`] is called, at
/// which point every transformation that read the value through
/// [`RecomputeProtected::get`] is recomputed.
pub struct RecomputeProtected<T> {
    value: Arc<RwLock<T>>,
    generation: Arc<AtomicU64>,
    trigger: Input<Trigger>,
}

#[derive(Debug, PartialEq)]
pub(crate) struct Trigger(u64);

const TRIGGER_KEY: &str = "trigger";

impl<T> Clone for RecomputeProtected<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            generation: self.generation.clone(),
            trigger: self.trigger.clone(),
        }
    }
}

impl<T: Clone> RecomputeProtected<T> {
    pub(crate) fn new(value: T, trigger: Input<Trigger>) -> Self {
        trigger.apply(Trigger(0));
        trigger.mark_synced();
        Self {
            value: Arc::new(RwLock::new(value)),
            generation: Arc::new(AtomicU64::new(0)),
            trigger,
        }
    }

    /// Reads the value, recording a dependency on it.
    pub fn get(&self, ctx: &mut HandlerContext<'_>) -> T {
        ctx.fetch_one(&self.trigger.collection(), TRIGGER_KEY);
        self.value.read().clone()
    }

    /// Reads the value without recording a dependency.
    pub fn access_unprotected(&self) -> T {
        self.value.read().clone()
    }

    /// Modifies the value without notifying readers.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.value.write());
    }

    /// Recomputes every transformation that has read the value.
    pub fn mark_dirty(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.trigger.apply(Trigger(generation));
    }
}

impl Keyed for Trigger {
    fn key(&self) -> Key {
        Key::from(TRIGGER_KEY)
    }
}
