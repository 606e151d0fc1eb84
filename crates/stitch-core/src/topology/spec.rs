//! Serializable topology as handed over by the path computer.
//!
//! This is the input to [`AttemptContext::from_spec`](crate::context::AttemptContext::from_spec).
//! Cross references are by identifier; the context resolves them to indices.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Link, Node};
use crate::aggregate::AggregateKind;
use crate::rpc::ApiVersion;
use crate::vlan_set::VlanSet;

/// One aggregate taking part in the circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSpec {
    /// Canonical aggregate URN.
    pub urn: String,
    /// Aggregate manager endpoint.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub kind: AggregateKind,
    #[serde(default)]
    pub api_version: ApiVersion,
    /// The user pinned this binding; failures here cannot be routed around.
    #[serde(default)]
    pub user_requested: bool,
    /// Extra names the aggregate is known by.
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl AggregateSpec {
    pub fn new(urn: impl Into<String>, kind: AggregateKind) -> Self {
        Self {
            urn: urn.into(),
            url: String::new(),
            kind,
            api_version: ApiVersion::default(),
            user_requested: false,
            synonyms: Vec::new(),
        }
    }
}

/// Reference to a hop by path and hop id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HopRef {
    pub path: String,
    pub hop: String,
}

impl HopRef {
    pub fn new(path: impl Into<String>, hop: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hop: hop.into(),
        }
    }
}

impl fmt::Display for HopRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.path, self.hop)
    }
}

/// One hop of a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopSpec {
    pub id: String,
    /// URN of the aggregate the hop is bound to.
    pub aggregate: String,
    /// Interface or link URN.
    pub urn: String,
    #[serde(default)]
    pub vlan_xlate: bool,
    pub range: VlanSet,
    pub suggested: VlanSet,
    /// Hop whose granted tag this hop must reuse.
    #[serde(default)]
    pub import_vlans_from: Option<HopRef>,
    /// Additional hops constraining this one.
    #[serde(default)]
    pub depends_on: Vec<HopRef>,
    #[serde(default)]
    pub loose: bool,
    #[serde(default)]
    pub producer: bool,
    #[serde(default)]
    pub consumer: bool,
    #[serde(default)]
    pub exclude_from_scs: bool,
}

impl HopSpec {
    pub fn new(
        id: impl Into<String>,
        aggregate: impl Into<String>,
        urn: impl Into<String>,
        range: VlanSet,
        suggested: VlanSet,
    ) -> Self {
        Self {
            id: id.into(),
            aggregate: aggregate.into(),
            urn: urn.into(),
            vlan_xlate: false,
            range,
            suggested,
            import_vlans_from: None,
            depends_on: Vec::new(),
            loose: false,
            producer: false,
            consumer: false,
            exclude_from_scs: false,
        }
    }

    /// Marks this hop as reusing the tag granted at `source`.
    pub fn importing(mut self, source: HopRef) -> Self {
        self.import_vlans_from = Some(source);
        self
    }

    pub fn translating(mut self) -> Self {
        self.vlan_xlate = true;
        self
    }

    pub fn producer(mut self) -> Self {
        self.producer = true;
        self
    }

    pub fn consumer(mut self) -> Self {
        self.consumer = true;
        self
    }
}

/// One path of the circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSpec {
    pub id: String,
    pub hops: Vec<HopSpec>,
}

/// A complete computed topology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySpec {
    pub aggregates: Vec<AggregateSpec>,
    pub paths: Vec<PathSpec>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub links: Vec<Link>,
    /// Unmodified request document the builder rewrites per aggregate.
    #[serde(default)]
    pub base_request: String,
}

impl TopologySpec {
    /// Finds a hop by reference.
    pub fn hop(&self, hop_ref: &HopRef) -> Option<&HopSpec> {
        self.paths
            .iter()
            .find(|p| p.id == hop_ref.path)
            .and_then(|p| p.hops.iter().find(|h| h.id == hop_ref.hop))
    }

    /// Iterates every hop with its path id.
    pub fn hops(&self) -> impl Iterator<Item = (&str, &HopSpec)> {
        self.paths
            .iter()
            .flat_map(|p| p.hops.iter().map(move |h| (p.id.as_str(), h)))
    }
}
