//! Request and manifest document contracts.
//!
//! Documents are opaque to the engine. A [`RequestBuilder`] rewrites the
//! base request with the current hop state and a [`ManifestParser`] reads
//! grants back out of what the aggregate returned.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::topology::{Link, Node};
use crate::vlan_set::VlanSet;

/// Request document submitted to an aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestDoc(pub String);

/// Manifest document returned by an aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestDoc(pub String);

impl RequestDoc {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ManifestDoc {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Error reading or writing a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("Malformed {kind} document: {message}")]
    Malformed { kind: &'static str, message: String },

    #[error("Failed to build request for {aggregate}: {message}")]
    Build { aggregate: String, message: String },
}

impl DocumentError {
    pub fn malformed(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            message: message.into(),
        }
    }

    pub fn build(aggregate: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Build {
            aggregate: aggregate.into(),
            message: message.into(),
        }
    }
}

/// VLAN fields of one hop as they go into a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopRequest {
    pub path_id: String,
    pub hop_id: String,
    pub urn: String,
    pub range: VlanSet,
    pub suggested: VlanSet,
}

/// Everything a builder needs to produce one aggregate's request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestView {
    pub aggregate_urn: String,
    pub hops: Vec<HopRequest>,
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
}

/// What an aggregate granted for one hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopGrant {
    pub path_global_id: Option<String>,
    pub range: VlanSet,
    pub suggested: VlanSet,
}

/// Result of looking a hop up in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLookup {
    Found(HopGrant),
    /// The aggregate left the hop out, as some vendors do for internal hops.
    NotFound,
}

/// Produces request documents. Must return identical output for identical input.
pub trait RequestBuilder: Send + Sync {
    fn build(&self, base: &str, view: &RequestView) -> Result<RequestDoc, DocumentError>;
}

/// Extracts per-hop grants from a manifest.
pub trait ManifestParser: Send + Sync {
    fn lookup(
        &self,
        manifest: &ManifestDoc,
        hop_id: &str,
        path_id: &str,
    ) -> Result<ManifestLookup, DocumentError>;
}
