#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use agentgateway_controller_core as core;
pub use agentgateway_controller_k8s_api as k8s;
pub use agentgateway_controller_k8s_index as index;
pub use agentgateway_controller_k8s_status as status;
pub use agentgateway_controller_krt as krt;
pub use agentgateway_controller_snapshot as snapshot;

mod args;
mod watch;

pub use self::args::Args;
