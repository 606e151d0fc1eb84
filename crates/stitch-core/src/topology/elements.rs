//! Nodes and links carried in the request alongside the hops.

use serde::{Deserialize, Serialize};

/// A compute node bound to one aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub client_id: String,
    pub aggregate_urn: String,
    pub interfaces: Vec<String>,
}

/// A link between node interfaces, possibly spanning aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub client_id: String,
    pub interface_refs: Vec<String>,
    pub aggregate_urns: Vec<String>,
}
