//! Istio `networking.istio.io/v1alpha3` resources.
//!
//! Only the fields the controller reads or writes are modeled. Route types
//! that operators commonly annotate by hand keep all other fields in a
//! flattened map so that they round-trip unchanged.

pub mod destination_rule;
pub mod virtual_service;

pub use self::{
    destination_rule::{DestinationRule, DestinationRuleSpec, Subset},
    virtual_service::{
        Destination, HttpMatchRequest, HttpRetry, HttpRoute, HttpRouteDestination,
        L4MatchAttributes, PortSelector, RouteDestination, StringMatch, TcpRoute,
        TlsMatchAttributes, TlsRoute, VirtualService, VirtualServiceSpec,
    },
};
