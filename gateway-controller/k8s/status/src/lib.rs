//! Writes computed statuses back to Gateway API objects.
//!
//! Status drafts produced by the index are queued as they change and patched
//! onto the live objects by a single [`Controller`] task. Conditions that did
//! not change keep their transition times, and entries owned by other
//! controllers are preserved.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod conditions;
mod controller;
mod manipulator;
mod metrics;
mod queue;

pub use self::{
    controller::Controller,
    manipulator::StatusManipulator,
    metrics::ControllerMetrics,
    queue::{enqueue, Desired, Draft, Update},
};
