//! Routing synthesis for mesh-managed services.
//!
//! Given a service's ports, the subsets defined for it and, optionally, the
//! rollout strategy that targets it, this crate computes the
//! `VirtualService` spec that should be applied. It performs no I/O; the
//! runtime reads cluster state, calls into this crate and writes the result.
//!
//! ```text
//! [ Service ] --ports--> [ synth ] <--template-- [ Strategy ]
//!                           ^
//! [ DestinationRule ] --subsets
//! ```

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod patch;
mod ports;
mod synth;

pub use self::{
    patch::merge_http_routes,
    ports::{is_tcp, port_number, supports_http},
    synth::{default_spec, desired_spec, fill_destination_ports, strategy_spec},
};
pub use routing_controller_k8s_api as k8s;
