//! Recorded-session infrastructure for the stitching engine
//!
//! Provides:
//! - JSON request and manifest documents
//! - An aggregate client replaying scripted responses
//! - A path computer replaying recorded topologies
//! - Topology builders and recurring scenarios
//!
//! A fixture directory holds `topology.json` (or `topology-1.json`,
//! `topology-2.json`, ... for successive path computations) and one
//! `aggregates/<name>.json` script per aggregate that should misbehave.

pub mod client;
pub mod codec;
pub mod error;
pub mod path_computer;
pub mod scenarios;

pub use client::{AggregateScript, FixtureClient, RecordedCall, RecordedResponse};
pub use codec::{GrantPlan, JsonDocumentCodec};
pub use error::{FixtureError, FixtureResult};
pub use path_computer::{apply_hints, FixturePathComputer};
pub use scenarios::*;
