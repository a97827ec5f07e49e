#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use routing_controller_core as core;
pub use routing_controller_k8s_api as k8s;

mod args;
pub mod controller;
pub mod events;
pub mod invalidate;
pub mod metrics;
pub mod queue;
pub mod reconcile;
pub mod store;
pub mod watch;


pub use self::{
    args::Args,
    controller::Controller,
    events::{EventSink, KubeEventSink},
    invalidate::Change,
    queue::Queue,
    reconcile::{Reconciler, SyncError},
    store::{KubeStore, Store},
};
