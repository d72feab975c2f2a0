//! # dnp-nat
//!
//! Keeps the router's port forwarding table in line with the packages
//! installed on the appliance.
//!
//! This crate provides:
//! - [`PortAggregator`]: the set of ports that should be open, derived from
//!   live container state with a compose-file fallback
//! - [`NatGateway`]: the router protocol boundary, implemented over the
//!   miniupnpc CLI by [`UpnpcGateway`]
//! - [`NatReconciler`]: the diff-and-apply step that converges the router
//!   towards the desired set

#![warn(missing_docs)]

pub mod aggregator;
pub mod defaults;
pub mod gateway;
pub mod reconciler;
pub mod upnpc;

pub use aggregator::PortAggregator;
pub use defaults::DEFAULT_PORTS_TO_OPEN;
pub use gateway::{GatewayError, GatewayInfo, NatGateway, NatMapping};
pub use reconciler::{
    Action, FailedOperation, NatReconciler, Plan, ReconcileReport, ReconcileState,
    ReconcilerSettings,
};
pub use upnpc::UpnpcGateway;
