#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod agent;
mod error;
pub mod hostname;
mod ids;
pub mod policy;
pub mod status;

pub use self::{
    error::{ConfigError, ErrorKind},
    ids::{GroupKind, NamespacedName, ObjectSource},
};

pub const DEFAULT_CONTROLLER_NAME: &str = "agentgateway.dev/agentgateway";
