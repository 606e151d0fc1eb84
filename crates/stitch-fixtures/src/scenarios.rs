//! Topology builders and recurring stitching scenarios.

use std::sync::Arc;

use stitch_core::{
    AggregateKind, AggregateSpec, ApiVersion, HopRef, HopSpec, PathSpec, ReservationOrch,
    StitchConfig, StitchServices, Stitcher, TopologySpec, VlanSet,
};

use crate::client::FixtureClient;
use crate::codec::JsonDocumentCodec;
use crate::error::FixtureResult;
use crate::path_computer::FixturePathComputer;

/// Slice name used by every scenario.
pub const SLICE: &str = "stitch-test";

/// URN of the aggregate named `name`.
pub fn aggregate_urn(name: &str) -> String {
    format!("urn:publicid:IDN+{}+authority+cm", name)
}

/// URN of interface `iface` at aggregate `name`.
pub fn interface_urn(name: &str, iface: &str) -> String {
    format!("urn:publicid:IDN+{}+interface+{}", name, iface)
}

/// Incremental [`TopologySpec`] construction.
#[derive(Debug, Clone, Default)]
pub struct TopologyBuilder {
    spec: TopologySpec,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds aggregate `name` of the given kind.
    pub fn aggregate(mut self, name: &str, kind: AggregateKind) -> Self {
        self.spec
            .aggregates
            .push(AggregateSpec::new(aggregate_urn(name), kind));
        self
    }

    /// Adds an aggregate the user pinned.
    pub fn user_requested(mut self, name: &str) -> Self {
        let mut aggregate = AggregateSpec::new(aggregate_urn(name), AggregateKind::Standard);
        aggregate.user_requested = true;
        self.spec.aggregates.push(aggregate);
        self
    }

    /// Adds a standard aggregate speaking the two-phase API.
    pub fn two_phase(mut self, name: &str) -> Self {
        let mut aggregate = AggregateSpec::new(aggregate_urn(name), AggregateKind::Standard);
        aggregate.api_version = ApiVersion::V3;
        self.spec.aggregates.push(aggregate);
        self
    }

    pub fn path(mut self, id: &str, hops: Vec<HopSpec>) -> Self {
        self.spec.paths.push(PathSpec {
            id: id.to_string(),
            hops,
        });
        self
    }

    pub fn base_request(mut self, base: &str) -> Self {
        self.spec.base_request = base.to_string();
        self
    }

    pub fn build(self) -> TopologySpec {
        self.spec
    }
}

/// Hop `id` at aggregate `name` on interface `iface`.
pub fn hop(id: &str, name: &str, iface: &str, range: VlanSet, suggested: VlanSet) -> HopSpec {
    HopSpec::new(id, aggregate_urn(name), interface_urn(name, iface), range, suggested)
}

/// A reservation engine talking to `client` through JSON documents.
pub fn orch(client: Arc<FixtureClient>, config: StitchConfig) -> FixtureResult<ReservationOrch> {
    let codec = Arc::new(JsonDocumentCodec::new());
    let services = StitchServices::new(client, codec.clone(), codec);
    Ok(ReservationOrch::new(config, services, SLICE)?)
}

/// A full stitcher over recorded aggregates and topologies.
pub fn stitcher(
    client: Arc<FixtureClient>,
    computer: Arc<FixturePathComputer>,
    config: StitchConfig,
) -> FixtureResult<Stitcher> {
    Ok(Stitcher::new(orch(client, config)?, computer))
}

/// Topologies that recur across tests.
pub mod topology_fixtures {
    use super::*;

    /// `a` and `b` joined by one path, both transit, requesting 100-110/105.
    pub fn two_hop_transit() -> TopologySpec {
        TopologyBuilder::new()
            .aggregate("a.net", AggregateKind::Standard)
            .aggregate("b.net", AggregateKind::Standard)
            .path(
                "link0",
                vec![
                    hop("1", "a.net", "eth0", VlanSet::range(100, 110), VlanSet::single(105)),
                    hop("2", "b.net", "eth0", VlanSet::range(100, 110), VlanSet::single(105)),
                ],
            )
            .base_request("<rspec/>")
            .build()
    }

    /// `a` produces a tag that `b` imports; `b` depends on `a`.
    pub fn producer_consumer() -> TopologySpec {
        TopologyBuilder::new()
            .aggregate("a.net", AggregateKind::Standard)
            .aggregate("b.net", AggregateKind::Standard)
            .path(
                "link0",
                vec![
                    hop("1", "a.net", "eth0", VlanSet::range(100, 110), VlanSet::Any).producer(),
                    hop("2", "b.net", "eth0", VlanSet::range(100, 110), VlanSet::Any)
                        .consumer()
                        .importing(HopRef::new("link0", "1")),
                ],
            )
            .base_request("<rspec/>")
            .build()
    }

    /// `a` -> `b` -> `c`, each importing from the previous aggregate.
    pub fn import_chain() -> TopologySpec {
        TopologyBuilder::new()
            .aggregate("a.net", AggregateKind::Standard)
            .aggregate("b.net", AggregateKind::Standard)
            .aggregate("c.net", AggregateKind::Standard)
            .path(
                "link0",
                vec![
                    hop("1", "a.net", "eth0", VlanSet::range(100, 110), VlanSet::single(100)),
                    hop("2", "b.net", "eth0", VlanSet::range(100, 110), VlanSet::single(100))
                        .importing(HopRef::new("link0", "1")),
                    hop("3", "c.net", "eth0", VlanSet::range(100, 110), VlanSet::single(100))
                        .importing(HopRef::new("link0", "2")),
                ],
            )
            .base_request("<rspec/>")
            .build()
    }

    /// A DCN aggregate `ion` followed by a standard one importing from it.
    pub fn dcn_then_standard() -> TopologySpec {
        TopologyBuilder::new()
            .aggregate("ion", AggregateKind::Dcn)
            .aggregate("b.net", AggregateKind::Standard)
            .path(
                "link0",
                vec![
                    hop("1", "ion", "eth0", VlanSet::range(200, 210), VlanSet::single(200)),
                    hop("2", "b.net", "eth0", VlanSet::range(200, 210), VlanSet::single(200))
                        .importing(HopRef::new("link0", "1")),
                ],
            )
            .base_request("<rspec/>")
            .build()
    }
}
