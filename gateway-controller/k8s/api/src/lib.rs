#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod backend;
pub mod duration;
pub mod gateway;
pub mod grpcroute;
pub mod httproute;
pub mod inference_pool;
pub mod labels;
pub mod policy;
pub mod reference_grant;
pub mod route;
pub mod service_entry;
pub mod tcproute;

pub use self::{
    backend::Backend,
    duration::GoDuration,
    gateway::{Gateway, GatewayClass},
    grpcroute::GrpcRoute,
    httproute::HttpRoute,
    inference_pool::InferencePool,
    reference_grant::ReferenceGrant,
    service_entry::ServiceEntry,
    tcproute::{TcpRoute, TlsRoute},
};
pub use k8s_openapi::{
    api::core::v1::{ConfigMap, Namespace, Secret, Service, ServicePort, ServiceSpec},
    apimachinery::pkg::{
        apis::meta::v1::{Condition, Time},
        util::intstr::IntOrString,
    },
    ByteString,
};
pub use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, Resource, ResourceExt},
    Client, Error,
};
