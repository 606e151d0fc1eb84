//! Hop and its negotiable link state.

use serde::{Deserialize, Serialize};

use super::{AggregateIndex, HopIndex, PathIndex};
use crate::vlan_set::VlanSet;

/// Negotiable VLAN state of one hop.
///
/// The request fields are what the next submission offers; the manifest
/// fields are what the aggregate granted on the last successful one and
/// are cleared on delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopLink {
    /// The aggregate can remap tags across itself at this hop.
    pub vlan_xlate: bool,
    /// Tags offered as acceptable.
    pub vlan_range_request: VlanSet,
    /// Tag proposed for this hop.
    pub vlan_suggested_request: VlanSet,
    /// Tags the aggregate reported as available.
    pub vlan_range_manifest: Option<VlanSet>,
    /// Tag the aggregate granted.
    pub vlan_suggested_manifest: Option<VlanSet>,
    /// The aggregate may choose a tag on our behalf (ANY is a legal suggestion).
    pub vlan_producer: bool,
    /// The aggregate accepts ANY handed to it from upstream.
    pub vlan_consumer: bool,
}

impl HopLink {
    /// Creates a link state with the given initial request.
    pub fn new(vlan_range_request: VlanSet, vlan_suggested_request: VlanSet) -> Self {
        Self {
            vlan_range_request,
            vlan_suggested_request,
            ..Default::default()
        }
    }

    /// Drops the granted values.
    pub fn clear_manifest(&mut self) {
        self.vlan_range_manifest = None;
        self.vlan_suggested_manifest = None;
    }

    /// Returns true once the aggregate granted a suggested tag.
    pub fn is_granted(&self) -> bool {
        self.vlan_suggested_manifest.is_some()
    }
}

/// The portion of one path handled by one aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hop {
    /// Hop identifier, unique within its path.
    pub id: String,
    /// Interface or link URN of this hop.
    pub urn: String,
    /// Owning path.
    pub path: PathIndex,
    /// Aggregate this hop is bound to.
    pub aggregate: AggregateIndex,
    /// Negotiable state.
    pub link: HopLink,
    /// Sticky request that the path computer avoid this hop.
    pub exclude_from_scs: bool,
    /// The aggregate binding may be moved by the path computer.
    pub loose: bool,
    /// This hop's tag must be derived from another hop's grant.
    pub import_vlans: bool,
    /// Source hop for imported tags.
    pub import_vlans_from: Option<HopIndex>,
    /// Hops whose choices constrain this one.
    pub depends_on: Vec<HopIndex>,
    vlans_unavailable: VlanSet,
}

impl Hop {
    /// Creates a hop with no exclusions and no import.
    pub fn new(
        id: impl Into<String>,
        urn: impl Into<String>,
        path: PathIndex,
        aggregate: AggregateIndex,
        link: HopLink,
    ) -> Self {
        Self {
            id: id.into(),
            urn: urn.into(),
            path,
            aggregate,
            link,
            exclude_from_scs: false,
            loose: false,
            import_vlans: false,
            import_vlans_from: None,
            depends_on: Vec::new(),
            vlans_unavailable: VlanSet::empty(),
        }
    }

    /// Tags proven unusable at this hop during the current attempt.
    pub fn vlans_unavailable(&self) -> &VlanSet {
        &self.vlans_unavailable
    }

    /// Records tags as unusable. The set only grows; ANY carries no
    /// concrete tag and is ignored.
    ///
    /// Returns true if anything new was recorded.
    pub fn exclude(&mut self, tags: &VlanSet) -> bool {
        if tags.is_any() || tags.is_subset_of(&self.vlans_unavailable) {
            return false;
        }
        self.vlans_unavailable = self.vlans_unavailable.union(tags);
        true
    }

    /// Tags still worth offering: the requested range minus everything
    /// proven unusable.
    pub fn candidate_range(&self) -> VlanSet {
        self.link.vlan_range_request.difference(&self.vlans_unavailable)
    }

    /// Returns true if the hop must carry the same tag as its neighbours.
    pub fn is_transit(&self) -> bool {
        !self.link.vlan_xlate
    }
}
