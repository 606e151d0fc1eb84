//! Per-attempt state.
//!
//! An [`AttemptContext`] owns every aggregate, hop and path of one attempt,
//! the dependency graph between aggregates and the exclusion hints gathered
//! so far. Restarting from path computation means building a new one.

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::aggregate::Aggregate;
use crate::document::{HopRequest, RequestView};
use crate::error::TopologyError;
use crate::graph::DependencyGraph;
use crate::hints::ExclusionHints;
use crate::topology::{
    AggregateIndex, Hop, HopIndex, HopLink, HopRef, Link, Node, Path, PathIndex, TopologySpec,
};
use crate::vlan_set::VlanSet;

/// Everything one attempt mutates.
#[derive(Debug)]
pub struct AttemptContext {
    /// 1-based attempt number.
    pub attempt: u32,
    aggregates: Vec<Aggregate>,
    hops: Vec<Hop>,
    paths: Vec<Path>,
    nodes: Vec<Node>,
    links: Vec<Link>,
    graph: DependencyGraph,
    hints: ExclusionHints,
    base_request: String,
    allocations: u32,
    rng: StdRng,
}

impl AttemptContext {
    /// Resolves a computed topology into a fresh attempt.
    ///
    /// Tags named in `hints` start out excluded at the hops they name.
    pub fn from_spec(
        spec: &TopologySpec,
        hints: ExclusionHints,
        attempt: u32,
        seed: Option<u64>,
    ) -> Result<Self, TopologyError> {
        let mut aggregates: Vec<Aggregate> = Vec::with_capacity(spec.aggregates.len());
        for agg_spec in &spec.aggregates {
            if aggregates.iter().any(|a| a.matches_urn(&agg_spec.urn)) {
                return Err(TopologyError::DuplicateAggregate {
                    urn: agg_spec.urn.clone(),
                });
            }
            aggregates.push(Aggregate::new(agg_spec));
        }

        let mut hops: Vec<Hop> = Vec::new();
        let mut paths: Vec<Path> = Vec::with_capacity(spec.paths.len());
        let mut refs: HashMap<HopRef, HopIndex> = HashMap::new();

        for path_spec in &spec.paths {
            let path_idx = PathIndex(paths.len());
            let mut path = Path::new(&path_spec.id);

            for hop_spec in &path_spec.hops {
                let hop_ref = HopRef::new(&path_spec.id, &hop_spec.id);
                let agg_idx = aggregates
                    .iter()
                    .position(|a| a.matches_urn(&hop_spec.aggregate))
                    .map(AggregateIndex)
                    .ok_or_else(|| TopologyError::UnknownAggregate {
                        hop: hop_ref.clone(),
                        urn: hop_spec.aggregate.clone(),
                    })?;

                let hop_idx = HopIndex(hops.len());
                if refs.insert(hop_ref.clone(), hop_idx).is_some() {
                    return Err(TopologyError::DuplicateHop { hop: hop_ref });
                }

                let link = HopLink {
                    vlan_xlate: hop_spec.vlan_xlate,
                    vlan_producer: hop_spec.producer,
                    vlan_consumer: hop_spec.consumer,
                    ..HopLink::new(hop_spec.range.clone(), hop_spec.suggested.clone())
                };
                let mut hop = Hop::new(&hop_spec.id, &hop_spec.urn, path_idx, agg_idx, link);
                hop.loose = hop_spec.loose;
                hop.exclude_from_scs =
                    hop_spec.exclude_from_scs || hints.is_excluded(&hop_spec.urn);
                hop.exclude(&hints.unavailable_for(&hop_spec.urn));
                hops.push(hop);

                path.hops.push(hop_idx);
                let agg = &mut aggregates[agg_idx.index()];
                agg.hops.push(hop_idx);
                if !agg.paths.contains(&path_idx) {
                    agg.paths.push(path_idx);
                }
            }
            paths.push(path);
        }

        // Resolve cross references now that every hop has an index
        for (path_id, hop_spec) in spec.hops() {
            let hop_ref = HopRef::new(path_id, &hop_spec.id);
            let hop_idx = refs[&hop_ref];
            let resolve = |target: &HopRef| {
                refs.get(target)
                    .copied()
                    .ok_or_else(|| TopologyError::UnknownHop {
                        hop: hop_ref.clone(),
                        target: target.clone(),
                    })
            };

            if let Some(source_ref) = &hop_spec.import_vlans_from {
                let source = resolve(source_ref)?;
                if source == hop_idx {
                    return Err(TopologyError::SelfImport {
                        hop: hop_ref.clone(),
                    });
                }
                let hop = &mut hops[hop_idx.index()];
                hop.import_vlans = true;
                hop.import_vlans_from = Some(source);
                hop.depends_on.push(source);
            }
            for dep_ref in &hop_spec.depends_on {
                let dep = resolve(dep_ref)?;
                let hop = &mut hops[hop_idx.index()];
                if dep != hop_idx && !hop.depends_on.contains(&dep) {
                    hop.depends_on.push(dep);
                }
            }
        }

        let mut graph = DependencyGraph::new();
        for hop in &hops {
            for dep in &hop.depends_on {
                graph.add_edge(hop.aggregate, hops[dep.index()].aggregate);
            }
        }
        graph
            .topological_order(aggregates.len())
            .map_err(|agg| TopologyError::DependencyCycle {
                urn: aggregates[agg.index()].urn.clone(),
            })?;

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(u64::from(attempt))),
            None => StdRng::from_entropy(),
        };

        debug!(
            attempt,
            aggregates = aggregates.len(),
            hops = hops.len(),
            paths = paths.len(),
            "Built attempt context"
        );

        Ok(Self {
            attempt,
            aggregates,
            hops,
            paths,
            nodes: spec.nodes.clone(),
            links: spec.links.clone(),
            graph,
            hints,
            base_request: spec.base_request.clone(),
            allocations: 0,
            rng,
        })
    }

    pub fn aggregate(&self, idx: AggregateIndex) -> &Aggregate {
        &self.aggregates[idx.index()]
    }

    pub fn aggregate_mut(&mut self, idx: AggregateIndex) -> &mut Aggregate {
        &mut self.aggregates[idx.index()]
    }

    pub fn hop(&self, idx: HopIndex) -> &Hop {
        &self.hops[idx.index()]
    }

    pub fn hop_mut(&mut self, idx: HopIndex) -> &mut Hop {
        &mut self.hops[idx.index()]
    }

    pub fn path(&self, idx: PathIndex) -> &Path {
        &self.paths[idx.index()]
    }

    pub fn path_mut(&mut self, idx: PathIndex) -> &mut Path {
        &mut self.paths[idx.index()]
    }

    pub fn aggregate_count(&self) -> usize {
        self.aggregates.len()
    }

    /// All aggregate handles in topology order.
    pub fn aggregate_indices(&self) -> impl Iterator<Item = AggregateIndex> {
        (0..self.aggregates.len()).map(AggregateIndex)
    }

    pub fn aggregates(&self) -> impl Iterator<Item = (AggregateIndex, &Aggregate)> {
        self.aggregates
            .iter()
            .enumerate()
            .map(|(i, a)| (AggregateIndex(i), a))
    }

    pub fn hops(&self) -> impl Iterator<Item = (HopIndex, &Hop)> {
        self.hops.iter().enumerate().map(|(i, h)| (HopIndex(i), h))
    }

    pub fn paths(&self) -> impl Iterator<Item = (PathIndex, &Path)> {
        self.paths.iter().enumerate().map(|(i, p)| (PathIndex(i), p))
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn hints(&self) -> &ExclusionHints {
        &self.hints
    }

    pub fn base_request(&self) -> &str {
        &self.base_request
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Finds an aggregate by canonical URN or synonym.
    pub fn aggregate_by_urn(&self, urn: &str) -> Option<AggregateIndex> {
        self.aggregates
            .iter()
            .position(|a| a.matches_urn(urn))
            .map(AggregateIndex)
    }

    /// Finds a hop by path and hop id.
    pub fn hop_by_ref(&self, hop_ref: &HopRef) -> Option<HopIndex> {
        self.hops().find_map(|(idx, hop)| {
            (hop.id == hop_ref.hop && self.path(hop.path).id == hop_ref.path).then_some(idx)
        })
    }

    /// Hops at `agg`, in topology order.
    pub fn hops_of(&self, agg: AggregateIndex) -> Vec<HopIndex> {
        self.aggregate(agg).hops.clone()
    }

    /// URNs of the hops at `agg`, parallel to [`Self::hops_of`].
    pub fn hop_urns(&self, agg: AggregateIndex) -> Vec<String> {
        self.aggregate(agg)
            .hops
            .iter()
            .map(|h| self.hop(*h).urn.clone())
            .collect()
    }

    /// Hops that import their tag from `source`.
    pub fn importers_of(&self, source: HopIndex) -> Vec<HopIndex> {
        self.hops()
            .filter(|(_, h)| h.import_vlans_from == Some(source))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Returns true if `agg` can be offered: not completed, not in process,
    /// and every aggregate it depends on completed.
    pub fn is_ready(&self, agg: AggregateIndex) -> bool {
        let a = self.aggregate(agg);
        !a.completed
            && !a.in_process
            && self
                .graph
                .depends_on(agg)
                .all(|dep| self.aggregate(dep).completed)
    }

    pub fn ready_aggregates(&self) -> Vec<AggregateIndex> {
        self.aggregate_indices()
            .filter(|agg| self.is_ready(*agg))
            .collect()
    }

    pub fn all_completed(&self) -> bool {
        self.aggregates.iter().all(|a| a.completed)
    }

    /// Records tags as unusable at a hop and in the attempt's hints.
    ///
    /// Returns true if the hop learned something new.
    pub fn exclude_vlans(&mut self, hop: HopIndex, tags: &VlanSet) -> bool {
        let urn = self.hops[hop.index()].urn.clone();
        self.hints.record_unavailable(&urn, tags);
        self.hops[hop.index()].exclude(tags)
    }

    /// Marks every hop at `agg` for the path computer to avoid.
    pub fn exclude_from_scs(&mut self, agg: AggregateIndex) {
        for hop_idx in self.hops_of(agg) {
            let hop = &mut self.hops[hop_idx.index()];
            hop.exclude_from_scs = true;
            self.hints.exclude_hop(&hop.urn);
        }
    }

    /// Marks everything downstream of `agg` incomplete.
    ///
    /// Returns the aggregates touched, in visit order.
    pub fn invalidate_dependents(&mut self, agg: AggregateIndex) -> Vec<AggregateIndex> {
        let order = self.graph.invalidation_order(agg);
        for dependent in &order {
            self.aggregates[dependent.index()].completed = false;
        }
        order
    }

    /// Counts one reservation submission against the attempt; returns the total.
    pub fn note_allocation(&mut self) -> u32 {
        self.allocations += 1;
        self.allocations
    }

    pub fn allocations(&self) -> u32 {
        self.allocations
    }

    /// Current VLAN state of `agg`'s hops, with the nodes and links it hosts.
    pub fn request_view(&self, agg: AggregateIndex) -> RequestView {
        let aggregate = self.aggregate(agg);
        let hops = aggregate
            .hops
            .iter()
            .map(|idx| {
                let hop = self.hop(*idx);
                HopRequest {
                    path_id: self.path(hop.path).id.clone(),
                    hop_id: hop.id.clone(),
                    urn: hop.urn.clone(),
                    range: hop.link.vlan_range_request.clone(),
                    suggested: hop.link.vlan_suggested_request.clone(),
                }
            })
            .collect();
        let nodes = self
            .nodes
            .iter()
            .filter(|n| aggregate.matches_urn(&n.aggregate_urn))
            .cloned()
            .collect();
        let links = self
            .links
            .iter()
            .filter(|l| l.aggregate_urns.iter().any(|u| aggregate.matches_urn(u)))
            .cloned()
            .collect();
        RequestView {
            aggregate_urn: aggregate.urn.clone(),
            hops,
            nodes,
            links,
        }
    }

    /// Hops at `agg` grouped by path, in path order.
    pub fn hops_by_path(&self, agg: AggregateIndex) -> BTreeMap<PathIndex, Vec<HopIndex>> {
        let mut grouped: BTreeMap<PathIndex, Vec<HopIndex>> = BTreeMap::new();
        for idx in &self.aggregate(agg).hops {
            grouped.entry(self.hop(*idx).path).or_default().push(*idx);
        }
        grouped
    }
}
