//! Exclusion hints carried from a failed attempt to the path computer.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::vlan_set::VlanSet;

/// Hops to avoid and tags known unusable, keyed by hop URN.
///
/// Hints only accumulate. Merging never drops an exclusion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionHints {
    #[serde(default)]
    pub excluded_hops: BTreeSet<String>,
    #[serde(default)]
    pub vlans_unavailable: BTreeMap<String, VlanSet>,
}

impl ExclusionHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.excluded_hops.is_empty() && self.vlans_unavailable.is_empty()
    }

    /// Asks the path computer to route around the hop.
    pub fn exclude_hop(&mut self, urn: &str) {
        self.excluded_hops.insert(urn.to_string());
    }

    pub fn is_excluded(&self, urn: &str) -> bool {
        self.excluded_hops.contains(urn)
    }

    /// Records tags proven unusable at the hop. ANY and empty sets are ignored.
    pub fn record_unavailable(&mut self, urn: &str, tags: &VlanSet) {
        if tags.is_any() || tags.is_empty() {
            return;
        }
        let entry = self.vlans_unavailable.entry(urn.to_string()).or_default();
        *entry = entry.union(tags);
    }

    /// Tags known unusable at the hop, empty if none.
    pub fn unavailable_for(&self, urn: &str) -> VlanSet {
        self.vlans_unavailable.get(urn).cloned().unwrap_or_default()
    }

    /// Folds another set of hints into this one.
    pub fn merge(&mut self, other: &ExclusionHints) {
        self.excluded_hops.extend(other.excluded_hops.iter().cloned());
        for (urn, tags) in &other.vlans_unavailable {
            self.record_unavailable(urn, tags);
        }
    }
}
