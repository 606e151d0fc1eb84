//! Path computer replaying recorded topologies.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use stitch_core::{ExclusionHints, PathComputeError, PathComputer, TopologySpec, VlanSet};
use tracing::debug;

use crate::error::{read_json, FixtureError, FixtureResult};

/// [`PathComputer`] answering the `n`-th call with the `n`-th recorded
/// topology; the last one answers every later call.
///
/// Hints are applied the way a path computer would: unavailable tags are
/// removed from hop ranges (from every hop of a path that does not
/// translate) and a suggestion that fell out of range is replaced by the
/// lowest remaining tag. A topology crossing an excluded hop cannot be
/// routed around and fails with `NoPath`.
#[derive(Debug)]
pub struct FixturePathComputer {
    topologies: Vec<TopologySpec>,
    received: Mutex<Vec<ExclusionHints>>,
}

impl FixturePathComputer {
    pub fn new(topologies: Vec<TopologySpec>) -> Self {
        Self {
            topologies,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn single(topology: TopologySpec) -> Self {
        Self::new(vec![topology])
    }

    /// Loads `topology.json`, or `topology-1.json`, `topology-2.json`, ...
    pub fn from_dir(dir: impl AsRef<Path>) -> FixtureResult<Self> {
        let dir = dir.as_ref();
        let single = dir.join("topology.json");
        if single.exists() {
            return Ok(Self::single(read_json(&single)?));
        }

        let mut topologies = Vec::new();
        for n in 1.. {
            let path = dir.join(format!("topology-{}.json", n));
            if !path.exists() {
                break;
            }
            topologies.push(read_json(&path)?);
        }
        if topologies.is_empty() {
            return Err(FixtureError::MissingTopology(dir.to_path_buf()));
        }
        Ok(Self::new(topologies))
    }

    /// Hints received, one entry per call.
    pub fn received_hints(&self) -> Vec<ExclusionHints> {
        self.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ExclusionHints>> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns `topology` adjusted to avoid what `hints` names.
pub fn apply_hints(
    mut topology: TopologySpec,
    hints: &ExclusionHints,
) -> Result<TopologySpec, PathComputeError> {
    for path in &mut topology.paths {
        if let Some(hop) = path.hops.iter().find(|h| hints.is_excluded(&h.urn)) {
            return Err(PathComputeError::NoPath(format!(
                "path {} crosses excluded hop {}",
                path.id, hop.urn
            )));
        }

        // Without translation the whole path carries one tag, so a tag
        // refused anywhere on it is unusable everywhere on it.
        let shared = path.hops.iter().all(|h| !h.vlan_xlate);
        let path_unavailable = path
            .hops
            .iter()
            .fold(VlanSet::empty(), |acc, h| acc.union(&hints.unavailable_for(&h.urn)));

        for hop in &mut path.hops {
            let unavailable = if shared {
                path_unavailable.clone()
            } else {
                hints.unavailable_for(&hop.urn)
            };
            if unavailable.is_empty() {
                continue;
            }
            hop.range = hop.range.difference(&unavailable);
            if hop.range.is_empty() {
                return Err(PathComputeError::NoPath(format!(
                    "no tags left at {} on path {}",
                    hop.urn, path.id
                )));
            }
            if !hop.suggested.is_any() && !hop.suggested.is_subset_of(&hop.range) {
                hop.suggested = hop
                    .range
                    .iter()
                    .next()
                    .map(VlanSet::single)
                    .unwrap_or(VlanSet::Any);
            }
        }
    }
    Ok(topology)
}

#[async_trait]
impl PathComputer for FixturePathComputer {
    async fn compute(
        &self,
        call: u32,
        hints: &ExclusionHints,
    ) -> Result<TopologySpec, PathComputeError> {
        self.lock().push(hints.clone());

        let index = (call.max(1) as usize - 1).min(self.topologies.len().saturating_sub(1));
        let topology = self
            .topologies
            .get(index)
            .cloned()
            .ok_or_else(|| PathComputeError::Unavailable("no topology recorded".into()))?;
        debug!(call, topology = index + 1, "Replaying recorded topology");
        apply_hints(topology, hints)
    }
}
