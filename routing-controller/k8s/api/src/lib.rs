#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod networking;
pub mod servicemesh;

pub use self::labels::Labels;
pub use k8s_openapi::api::{
    self,
    core::v1::{ObjectReference, Service, ServicePort, ServiceSpec},
};
pub use kube::{
    api::{Api, DeleteParams, ObjectMeta, PostParams, ResourceExt},
    runtime::{events, reflector, watcher},
    Client, Error, Resource,
};
