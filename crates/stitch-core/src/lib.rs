//! Reservation and VLAN tag negotiation for stitched circuits.
//!
//! A stitched circuit crosses several independently administered
//! aggregates. Each one picks the VLAN tag it grants on its own, so the
//! circuit only works once every aggregate on every path has converged on
//! compatible tags. This crate drives that convergence:
//!
//! - [`VlanSet`]: tag sets with a symbolic ANY
//! - [`AttemptContext`]: aggregates, hops, paths and the dependency graph of one attempt
//! - [`ReservationOrch`]: allocate, delete and negotiate at one aggregate
//! - [`FlavorStrategy`]: per-family error classification
//! - [`Stitcher`]: sequential driver with restarts from path computation
//!
//! # Signals
//!
//! Every engine operation either succeeds or returns a [`StitchSignal`]:
//!
//! 1. `RetryAggregate`: new tags were picked locally; offer the aggregate again
//! 2. `RestartFromScs`: delete everything and recompute the topology using the carried hints
//! 3. `Fatal`: abort
//!
//! # Example
//!
//! ```ignore
//! use stitch_core::{ReservationOrch, StitchConfig, StitchServices, Stitcher};
//!
//! let orch = ReservationOrch::new(StitchConfig::default(), services, "my-slice")?;
//! let mut stitcher = Stitcher::new(orch, path_computer);
//! let report = stitcher.run().await?;
//! ```

pub mod aggregate;
pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod graph;
pub mod hints;
pub mod orch;
pub mod rpc;
pub mod scheduler;
pub mod signal;
pub mod topology;
pub mod vlan_set;

pub use aggregate::{strategy_for, Aggregate, AggregateKind, FailureClass, FlavorStrategy};
pub use config::StitchConfig;
pub use context::AttemptContext;
pub use document::{
    DocumentError, HopGrant, HopRequest, ManifestDoc, ManifestLookup, ManifestParser,
    RequestBuilder, RequestDoc, RequestView,
};
pub use error::{ConfigError, TopologyError};
pub use graph::DependencyGraph;
pub use hints::ExclusionHints;
pub use orch::{ReservationOrch, ReservationStats, StitchServices};
pub use rpc::{
    AggregateClient, AllocationState, ApiVersion, DeleteOutcome, RpcError, RpcErrorCode,
    RpcOperation, RpcResult, RpcTarget,
};
pub use scheduler::{AttemptReport, PathComputeError, PathComputer, Stitcher};
pub use signal::{SignalKind, StitchResult, StitchSignal};
pub use topology::{
    AggregateIndex, AggregateSpec, Hop, HopIndex, HopLink, HopRef, HopSpec, Link, Node, Path,
    PathIndex, PathSpec, TopologySpec,
};
pub use vlan_set::{VlanSet, VlanSetError, VLAN_MAX, VLAN_MIN};
