//! JSON request and manifest documents.
//!
//! Requests carry the base document verbatim plus the VLAN fields of every
//! hop at the target aggregate. Manifests map path id to circuit id and
//! per-hop grants:
//!
//! ```json
//! {"aggregate":"urn:...","paths":{"link0":{"global_id":"c-1","hops":{"1":{"range":"100-110","suggested":"105"}}}}}
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use stitch_core::{
    DocumentError, HopGrant, HopRequest, Link, ManifestDoc, ManifestLookup, ManifestParser, Node,
    RequestBuilder, RequestDoc, RequestView, VlanSet, VLAN_MIN,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RequestJson {
    base: String,
    aggregate: String,
    hops: Vec<HopRequest>,
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ManifestJson {
    aggregate: String,
    paths: BTreeMap<String, PathGrantJson>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PathGrantJson {
    #[serde(default)]
    global_id: Option<String>,
    hops: BTreeMap<String, HopGrantJson>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct HopGrantJson {
    range: VlanSet,
    suggested: VlanSet,
}

/// How a simulated aggregate answers a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantPlan {
    /// Circuit id to stamp on every path.
    #[serde(default)]
    pub global_id: Option<String>,
    /// Granted tag per hop, keyed by `path/hop` or bare hop id.
    #[serde(default)]
    pub suggested: BTreeMap<String, VlanSet>,
    /// Hops left out of the manifest.
    #[serde(default)]
    pub omit_hops: BTreeSet<String>,
}

impl GrantPlan {
    fn lookup<'a, T>(map: &'a BTreeMap<String, T>, path: &str, hop: &str) -> Option<&'a T> {
        map.get(&format!("{}/{}", path, hop)).or_else(|| map.get(hop))
    }

    fn omits(&self, path: &str, hop: &str) -> bool {
        self.omit_hops.contains(&format!("{}/{}", path, hop)) || self.omit_hops.contains(hop)
    }
}

/// Request builder and manifest parser over JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocumentCodec;

impl JsonDocumentCodec {
    pub fn new() -> Self {
        Self
    }

    /// Builds the manifest an aggregate following `plan` would return for `request`.
    ///
    /// Hops get the requested range and, unless the plan says otherwise, the
    /// requested tag. A suggested ANY is resolved to the lowest tag in range.
    pub fn echo_manifest(request: &RequestDoc, plan: &GrantPlan) -> Result<ManifestDoc, DocumentError> {
        let request: RequestJson = serde_json::from_str(request.as_str())
            .map_err(|e| DocumentError::malformed("request", e.to_string()))?;

        let mut manifest = ManifestJson {
            aggregate: request.aggregate.clone(),
            paths: BTreeMap::new(),
        };
        for hop in &request.hops {
            let path = manifest
                .paths
                .entry(hop.path_id.clone())
                .or_insert_with(|| PathGrantJson {
                    global_id: plan.global_id.clone(),
                    hops: BTreeMap::new(),
                });
            if plan.omits(&hop.path_id, &hop.hop_id) {
                continue;
            }
            let suggested = match GrantPlan::lookup(&plan.suggested, &hop.path_id, &hop.hop_id) {
                Some(tag) => tag.clone(),
                None if hop.suggested.is_any() => {
                    VlanSet::single(hop.range.iter().next().unwrap_or(VLAN_MIN))
                }
                None => hop.suggested.clone(),
            };
            path.hops.insert(
                hop.hop_id.clone(),
                HopGrantJson {
                    range: hop.range.clone(),
                    suggested,
                },
            );
        }

        serde_json::to_string(&manifest)
            .map(ManifestDoc)
            .map_err(|e| DocumentError::malformed("manifest", e.to_string()))
    }

    /// Hop ids and requested tags carried in a request, for assertions.
    pub fn requested_tags(request: &RequestDoc) -> Result<Vec<(String, VlanSet)>, DocumentError> {
        let request: RequestJson = serde_json::from_str(request.as_str())
            .map_err(|e| DocumentError::malformed("request", e.to_string()))?;
        Ok(request
            .hops
            .into_iter()
            .map(|h| (format!("{}/{}", h.path_id, h.hop_id), h.suggested))
            .collect())
    }
}

impl RequestBuilder for JsonDocumentCodec {
    fn build(&self, base: &str, view: &RequestView) -> Result<RequestDoc, DocumentError> {
        let request = RequestJson {
            base: base.to_string(),
            aggregate: view.aggregate_urn.clone(),
            hops: view.hops.clone(),
            nodes: view.nodes.clone(),
            links: view.links.clone(),
        };
        serde_json::to_string(&request)
            .map(RequestDoc)
            .map_err(|e| DocumentError::build(&view.aggregate_urn, e.to_string()))
    }
}

impl ManifestParser for JsonDocumentCodec {
    fn lookup(
        &self,
        manifest: &ManifestDoc,
        hop_id: &str,
        path_id: &str,
    ) -> Result<ManifestLookup, DocumentError> {
        let manifest: ManifestJson = serde_json::from_str(manifest.as_str())
            .map_err(|e| DocumentError::malformed("manifest", e.to_string()))?;

        let Some(path) = manifest.paths.get(path_id) else {
            return Ok(ManifestLookup::NotFound);
        };
        Ok(match path.hops.get(hop_id) {
            Some(grant) => ManifestLookup::Found(HopGrant {
                path_global_id: path.global_id.clone(),
                range: grant.range.clone(),
                suggested: grant.suggested.clone(),
            }),
            None => ManifestLookup::NotFound,
        })
    }
}
