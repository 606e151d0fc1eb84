//! Aggregate state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::{ManifestDoc, RequestDoc};
use crate::rpc::{ApiVersion, RpcTarget};
use crate::topology::{AggregateSpec, HopIndex, PathIndex};

/// Aggregate manager family, selecting error semantics and manifest quirks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateKind {
    /// ProtoGENI-style manager with typed error codes.
    #[default]
    Standard,
    /// Reservation outcome known only after status polling.
    Dcn,
    /// ExoGENI-style manager; omits internal hops from manifests.
    Eg,
    /// PlanetLab-style manager.
    Pg,
}

impl AggregateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateKind::Standard => "standard",
            AggregateKind::Dcn => "dcn",
            AggregateKind::Eg => "eg",
            AggregateKind::Pg => "pg",
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const CM_SUFFIX: &str = "+authority+cm";
const AM_SUFFIX: &str = "+authority+am";

/// The `+cm`/`+am` counterpart of an authority URN, if it has one.
pub fn authority_synonym(urn: &str) -> Option<String> {
    if let Some(prefix) = urn.strip_suffix(CM_SUFFIX) {
        Some(format!("{}{}", prefix, AM_SUFFIX))
    } else {
        urn.strip_suffix(AM_SUFFIX)
            .map(|prefix| format!("{}{}", prefix, CM_SUFFIX))
    }
}

/// One aggregate's attempt-scoped state.
#[derive(Debug, Clone)]
pub struct Aggregate {
    /// Canonical URN.
    pub urn: String,
    pub url: String,
    pub kind: AggregateKind,
    pub api_version: ApiVersion,
    /// The user pinned this binding.
    pub user_requested: bool,
    urn_syns: Vec<String>,
    /// Hops bound here.
    pub hops: Vec<HopIndex>,
    /// Paths crossing this aggregate.
    pub paths: Vec<PathIndex>,
    pub completed: bool,
    pub in_process: bool,
    /// Reservation submissions so far.
    pub allocate_tries: u32,
    /// Local tag re-picks so far.
    pub local_pick_new_vlan_tries: u32,
    /// Last request submitted.
    pub request_doc: Option<RequestDoc>,
    /// Last manifest accepted.
    pub manifest_doc: Option<ManifestDoc>,
}

impl Aggregate {
    pub fn new(spec: &AggregateSpec) -> Self {
        let mut urn_syns: Vec<String> = authority_synonym(&spec.urn).into_iter().collect();
        for syn in &spec.synonyms {
            if syn != &spec.urn && !urn_syns.contains(syn) {
                urn_syns.push(syn.clone());
            }
        }
        Self {
            urn: spec.urn.clone(),
            url: spec.url.clone(),
            kind: spec.kind,
            api_version: spec.api_version,
            user_requested: spec.user_requested,
            urn_syns,
            hops: Vec::new(),
            paths: Vec::new(),
            completed: false,
            in_process: false,
            allocate_tries: 0,
            local_pick_new_vlan_tries: 0,
            request_doc: None,
            manifest_doc: None,
        }
    }

    /// Alternate names this aggregate answers to.
    pub fn urn_syns(&self) -> &[String] {
        &self.urn_syns
    }

    /// Returns true if `urn` is the canonical URN or a synonym.
    pub fn matches_urn(&self, urn: &str) -> bool {
        self.urn == urn || self.urn_syns.iter().any(|s| s == urn)
    }

    /// RPC addressing for this aggregate within `slice`.
    pub fn target(&self, slice: &str) -> RpcTarget {
        RpcTarget {
            urn: self.urn.clone(),
            url: self.url.clone(),
            version: self.api_version,
            slice: slice.to_string(),
        }
    }

    /// Returns true if a reservation may be held at the aggregate.
    pub fn has_reservation(&self) -> bool {
        self.manifest_doc.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_synonym() {
        assert_eq!(
            authority_synonym("urn:publicid:IDN+utah.net+authority+cm").as_deref(),
            Some("urn:publicid:IDN+utah.net+authority+am")
        );
        assert_eq!(
            authority_synonym("urn:publicid:IDN+utah.net+authority+am").as_deref(),
            Some("urn:publicid:IDN+utah.net+authority+cm")
        );
        assert_eq!(authority_synonym("urn:publicid:IDN+utah.net+authority+sa"), None);
    }

    #[test]
    fn test_matches_urn() {
        let mut spec = AggregateSpec::new("urn:publicid:IDN+utah.net+authority+cm", AggregateKind::Standard);
        spec.synonyms.push("urn:publicid:IDN+utah.net+authority+ig".to_string());
        let agg = Aggregate::new(&spec);
        assert!(agg.matches_urn("urn:publicid:IDN+utah.net+authority+cm"));
        assert!(agg.matches_urn("urn:publicid:IDN+utah.net+authority+am"));
        assert!(agg.matches_urn("urn:publicid:IDN+utah.net+authority+ig"));
        assert!(!agg.matches_urn("urn:publicid:IDN+other.net+authority+cm"));
    }
}
