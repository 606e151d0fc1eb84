//! VLAN negotiation at a single aggregate
//!
//! Drives the reservation engine directly against scripted aggregates and
//! checks which signal each failure produces.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use stitch_core::{
    AggregateIndex, AggregateKind, AttemptContext, ExclusionHints, HopIndex, HopRef,
    ReservationOrch, RpcOperation, SignalKind, StitchConfig, StitchSignal, TopologySpec, VlanSet,
};
use stitch_fixtures::{
    aggregate_urn, hop, interface_urn, orch, topology_fixtures, FixtureClient, JsonDocumentCodec,
    RecordedResponse, TopologyBuilder,
};

fn setup(
    spec: &TopologySpec,
    client: &Arc<FixtureClient>,
    config: StitchConfig,
) -> (ReservationOrch, AttemptContext) {
    let ctx = AttemptContext::from_spec(spec, ExclusionHints::new(), 1, Some(42))
        .expect("topology resolves");
    (orch(client.clone(), config).unwrap(), ctx)
}

fn agg(ctx: &AttemptContext, name: &str) -> AggregateIndex {
    ctx.aggregate_by_urn(&aggregate_urn(name)).expect("aggregate present")
}

fn hop_at(ctx: &AttemptContext, path: &str, id: &str) -> HopIndex {
    ctx.hop_by_ref(&HopRef::new(path, id)).expect("hop present")
}

/// Scenario:
/// 1. `a` requests 105 out of 100-110 and is granted 999
/// 2. Both tags are excluded, the reservation deleted and a retry signaled
/// 3. The next request carries a fresh tag from 100-110 other than 105
#[tokio::test]
async fn test_granted_tag_outside_request_triggers_local_repick() {
    let a_urn = aggregate_urn("a.net");
    let client = Arc::new(FixtureClient::new().with_script(
        &a_urn,
        RpcOperation::Create,
        [
            RecordedResponse::grant_tag("1", VlanSet::single(999)),
            RecordedResponse::grant(),
        ],
    ));
    let (mut orch, mut ctx) = setup(
        &topology_fixtures::two_hop_transit(),
        &client,
        StitchConfig::immediate(),
    );
    let a = agg(&ctx, "a.net");
    let h1 = hop_at(&ctx, "link0", "1");

    let signal = orch.allocate(&mut ctx, a).await.unwrap_err();
    assert_eq!(signal.kind(), SignalKind::RetryAggregate);
    assert!(ctx.hop(h1).vlans_unavailable().contains(105));
    assert!(ctx.hop(h1).vlans_unavailable().contains(999));
    assert!(!ctx.aggregate(a).completed);
    assert!(!ctx.aggregate(a).has_reservation());

    let picked = ctx.hop(h1).link.vlan_suggested_request.single_tag().unwrap();
    assert!((100..=110).contains(&picked));
    assert_ne!(picked, 105);

    orch.allocate(&mut ctx, a).await.unwrap();
    assert!(ctx.aggregate(a).completed);
    assert_eq!(
        ctx.hop(h1).link.vlan_suggested_manifest,
        Some(VlanSet::single(picked))
    );
    assert_eq!(
        client.operations(&a_urn),
        vec![RpcOperation::Create, RpcOperation::Delete, RpcOperation::Create]
    );
    assert_eq!(orch.stats().local_repairs, 1);
}

/// Scenario: two transit hops of one path share interface eth0; once 200
/// is refused there, neither hop requests 200 again and both move together.
#[tokio::test]
async fn test_same_interface_hops_share_exclusion() {
    let b_urn = aggregate_urn("b.net");
    let eth0 = interface_urn("b.net", "eth0");
    let spec = TopologyBuilder::new()
        .aggregate("b.net", AggregateKind::Standard)
        .path(
            "link0",
            vec![
                hop("1", "b.net", "eth0", VlanSet::range(199, 201), VlanSet::single(200)),
                hop("2", "b.net", "eth0", VlanSet::range(199, 201), VlanSet::single(200)),
            ],
        )
        .build();
    let client = Arc::new(FixtureClient::new().with_script(
        &b_urn,
        RpcOperation::Create,
        [
            RecordedResponse::vlan_unavailable_at(&eth0, "vlan tag 200 in use"),
            RecordedResponse::grant(),
        ],
    ));
    let (mut orch, mut ctx) = setup(&spec, &client, StitchConfig::immediate());
    let b = agg(&ctx, "b.net");

    let signal = orch.allocate(&mut ctx, b).await.unwrap_err();
    assert_eq!(signal.kind(), SignalKind::RetryAggregate);
    for id in ["1", "2"] {
        let h = ctx.hop(hop_at(&ctx, "link0", id));
        assert!(h.vlans_unavailable().contains(200), "hop {id}");
        assert!(!h.link.vlan_range_request.contains(200), "hop {id}");
    }

    orch.allocate(&mut ctx, b).await.unwrap();
    let requests = client.requests(&b_urn);
    let tags = JsonDocumentCodec::requested_tags(&requests[1]).unwrap();
    assert_eq!(tags.len(), 2);
    assert_eq!(tags[0].1, tags[1].1);
    assert_ne!(tags[0].1, VlanSet::single(200));
}

/// Scenario: `b` imports its tag from `a`; a refusal at `b` must restart
/// from path computation even though `b` has tags left in range.
#[tokio::test]
async fn test_importing_aggregate_escalates() {
    let b_urn = aggregate_urn("b.net");
    let client = Arc::new(FixtureClient::new().with_script(
        &b_urn,
        RpcOperation::Create,
        [RecordedResponse::vlan_unavailable("could not reserve vlan tag")],
    ));
    let (mut orch, mut ctx) = setup(
        &topology_fixtures::import_chain(),
        &client,
        StitchConfig::immediate(),
    );
    let (a, b) = (agg(&ctx, "a.net"), agg(&ctx, "b.net"));

    orch.allocate(&mut ctx, a).await.unwrap();
    let signal = orch.allocate(&mut ctx, b).await.unwrap_err();

    match signal {
        StitchSignal::RestartFromScs { aggregate, hints, .. } => {
            assert_eq!(aggregate, b_urn);
            assert_eq!(
                hints.unavailable_for(&interface_urn("b.net", "eth0")),
                VlanSet::single(100)
            );
            assert!(hints.excluded_hops.is_empty());
        }
        other => panic!("expected restart, got {other:?}"),
    }
    assert!(!ctx.hop(hop_at(&ctx, "link0", "2")).candidate_range().is_empty());
    assert_eq!(orch.stats().local_repairs, 0);
}

#[tokio::test]
async fn test_busy_aggregate_is_retried_unchanged() {
    let a_urn = aggregate_urn("a.net");
    let client = Arc::new(FixtureClient::new().with_script(
        &a_urn,
        RpcOperation::Create,
        [
            RecordedResponse::busy("server is busy"),
            RecordedResponse::am_error(14, "try again"),
            RecordedResponse::grant(),
        ],
    ));
    let (mut orch, mut ctx) = setup(
        &topology_fixtures::two_hop_transit(),
        &client,
        StitchConfig::immediate(),
    );
    let a = agg(&ctx, "a.net");

    orch.allocate(&mut ctx, a).await.unwrap();
    assert_eq!(client.count(&a_urn, RpcOperation::Create), 3);
    assert_eq!(orch.stats().busy_retries, 2);
    // Retries resend the same document
    let requests = client.requests(&a_urn);
    assert!(requests.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(ctx.aggregate(a).allocate_tries, 1);
}

#[tokio::test]
async fn test_busy_retries_are_bounded() {
    let a_urn = aggregate_urn("a.net");
    let client = Arc::new(FixtureClient::new().with_script(
        &a_urn,
        RpcOperation::Create,
        [RecordedResponse::busy("resource is busy")],
    ));
    let config = StitchConfig {
        busy_max_tries: 2,
        ..StitchConfig::immediate()
    };
    let (mut orch, mut ctx) = setup(&topology_fixtures::two_hop_transit(), &client, config);
    let agg_a_net = agg(&ctx, "a.net");
    let signal = orch.allocate(&mut ctx, agg_a_net).await.unwrap_err();
    assert_eq!(signal.kind(), SignalKind::Fatal);
    assert_eq!(client.count(&a_urn, RpcOperation::Create), 3);
}

/// A failed provision releases the allocation before the failure is handled.
#[tokio::test]
async fn test_two_phase_provision_failure_deletes_allocation() {
    let a_urn = aggregate_urn("a.net");
    let spec = TopologyBuilder::new()
        .two_phase("a.net")
        .path(
            "link0",
            vec![hop("1", "a.net", "eth0", VlanSet::range(100, 110), VlanSet::single(105))],
        )
        .build();
    let client = Arc::new(FixtureClient::new().with_script(
        &a_urn,
        RpcOperation::Provision,
        [RecordedResponse::fatal("malformed rspec")],
    ));
    let (mut orch, mut ctx) = setup(&spec, &client, StitchConfig::immediate());
    let agg_a_net = agg(&ctx, "a.net");
    let signal = orch.allocate(&mut ctx, agg_a_net).await.unwrap_err();
    assert_eq!(
        client.operations(&a_urn),
        vec![RpcOperation::Allocate, RpcOperation::Provision, RpcOperation::Delete]
    );
    match signal {
        StitchSignal::RestartFromScs { hints, .. } => {
            assert!(hints.is_excluded(&interface_urn("a.net", "eth0")));
        }
        other => panic!("expected restart, got {other:?}"),
    }
}

#[tokio::test]
async fn test_two_phase_success() {
    let a_urn = aggregate_urn("a.net");
    let spec = TopologyBuilder::new()
        .two_phase("a.net")
        .path(
            "link0",
            vec![hop("1", "a.net", "eth0", VlanSet::range(100, 110), VlanSet::single(105))],
        )
        .build();
    let client = Arc::new(FixtureClient::new().with_script(
        &a_urn,
        RpcOperation::Provision,
        [RecordedResponse::grant_circuit("circuit-9")],
    ));
    let (mut orch, mut ctx) = setup(&spec, &client, StitchConfig::immediate());
    let agg_a_net = agg(&ctx, "a.net");
    orch.allocate(&mut ctx, agg_a_net).await.unwrap();
    let path = ctx.hop(hop_at(&ctx, "link0", "1")).path;
    assert_eq!(ctx.path(path).global_id.as_deref(), Some("circuit-9"));
}

#[tokio::test]
async fn test_user_requested_aggregate_failure_is_fatal() {
    let a_urn = aggregate_urn("a.net");
    let spec = TopologyBuilder::new()
        .user_requested("a.net")
        .path(
            "link0",
            vec![hop("1", "a.net", "eth0", VlanSet::range(100, 110), VlanSet::single(105))],
        )
        .build();
    let client = Arc::new(FixtureClient::new().with_script(
        &a_urn,
        RpcOperation::Create,
        [RecordedResponse::am_error(6, "not enough resources")],
    ));
    let (mut orch, mut ctx) = setup(&spec, &client, StitchConfig::immediate());
    let agg_a_net = agg(&ctx, "a.net");
    let signal = orch.allocate(&mut ctx, agg_a_net).await.unwrap_err();
    assert_eq!(signal.kind(), SignalKind::Fatal);
    assert!(signal.to_string().contains("cannot be routed around"));
}

/// Local repicks stop at the configured bound; the aggregate is then
/// excluded from the next path computation.
#[tokio::test]
async fn test_local_repicks_are_bounded() {
    let a_urn = aggregate_urn("a.net");
    let spec = TopologyBuilder::new()
        .aggregate("a.net", AggregateKind::Standard)
        .path(
            "link0",
            vec![hop("1", "a.net", "eth0", VlanSet::range(100, 110), VlanSet::single(105))],
        )
        .build();
    let client = Arc::new(FixtureClient::new().with_script(
        &a_urn,
        RpcOperation::Create,
        [RecordedResponse::am_error(24, "vlan refused")],
    ));
    let config = StitchConfig {
        max_agg_new_vlan_tries: 2,
        ..StitchConfig::immediate()
    };
    let (mut orch, mut ctx) = setup(&spec, &client, config);
    let a = agg(&ctx, "a.net");

    let mut retries = 0;
    let signal = loop {
        match orch.allocate(&mut ctx, a).await {
            Err(StitchSignal::RetryAggregate { .. }) => retries += 1,
            Err(other) => break other,
            Ok(()) => panic!("aggregate never grants"),
        }
    };

    assert_eq!(retries, 2);
    assert_eq!(client.count(&a_urn, RpcOperation::Create), 3);
    assert_eq!(ctx.aggregate(a).local_pick_new_vlan_tries, 2);
    match signal {
        StitchSignal::RestartFromScs { hints, .. } => {
            assert!(hints.is_excluded(&interface_urn("a.net", "eth0")));
            assert_eq!(
                hints
                    .unavailable_for(&interface_urn("a.net", "eth0"))
                    .len(),
                Some(3)
            );
        }
        other => panic!("expected restart, got {other:?}"),
    }
}

#[tokio::test]
async fn test_allocation_budget_per_attempt() {
    let config = StitchConfig {
        max_allocations_per_attempt: 1,
        ..StitchConfig::immediate()
    };
    let client = Arc::new(FixtureClient::new());
    let (mut orch, mut ctx) = setup(&topology_fixtures::two_hop_transit(), &client, config);
    let agg_a_net = agg(&ctx, "a.net");
    orch.allocate(&mut ctx, agg_a_net).await.unwrap();
    let agg_b_net = agg(&ctx, "b.net");
    let signal = orch.allocate(&mut ctx, agg_b_net).await.unwrap_err();
    assert_eq!(signal.kind(), SignalKind::Fatal);
    assert_eq!(client.count(&aggregate_urn("b.net"), RpcOperation::Create), 0);
}

#[tokio::test]
async fn test_producer_grant_is_imported_by_consumer() {
    let client = Arc::new(FixtureClient::new());
    let (mut orch, mut ctx) = setup(
        &topology_fixtures::producer_consumer(),
        &client,
        StitchConfig::immediate(),
    );
    let (a, b) = (agg(&ctx, "a.net"), agg(&ctx, "b.net"));
    assert!(!ctx.is_ready(b));

    orch.allocate(&mut ctx, a).await.unwrap();
    let granted = ctx
        .hop(hop_at(&ctx, "link0", "1"))
        .link
        .vlan_suggested_manifest
        .clone()
        .unwrap();
    assert_eq!(granted, VlanSet::single(100));

    orch.allocate(&mut ctx, b).await.unwrap();
    let h2 = ctx.hop(hop_at(&ctx, "link0", "2"));
    assert_eq!(h2.link.vlan_suggested_request, granted);
    assert_eq!(h2.link.vlan_suggested_manifest, Some(granted));
}

/// Scenario: `b` imports 100 from `a`, but an earlier attempt learned that
/// 100 is refused at `b`. Nothing is sent to `b` and the attempt restarts
/// from path computation.
#[tokio::test]
async fn test_import_of_known_unavailable_tag_escalates() {
    let b_urn = aggregate_urn("b.net");
    let b_eth0 = interface_urn("b.net", "eth0");
    let mut hints = ExclusionHints::new();
    hints.record_unavailable(&b_eth0, &VlanSet::single(100));
    let client = Arc::new(FixtureClient::new());
    let mut ctx = AttemptContext::from_spec(&topology_fixtures::import_chain(), hints, 2, Some(42))
        .expect("topology resolves");
    let mut orch = orch(client.clone(), StitchConfig::immediate()).unwrap();
    let (a, b) = (agg(&ctx, "a.net"), agg(&ctx, "b.net"));

    orch.allocate(&mut ctx, a).await.unwrap();
    let signal = orch.allocate(&mut ctx, b).await.unwrap_err();

    match signal {
        StitchSignal::RestartFromScs { aggregate, hints, .. } => {
            assert_eq!(aggregate, b_urn);
            assert!(hints.unavailable_for(&b_eth0).contains(100));
        }
        other => panic!("expected restart, got {other:?}"),
    }
    assert_eq!(client.count(&b_urn, RpcOperation::Create), 0);
    assert!(!ctx.aggregate(b).in_process);
}

/// Scenario: an EG aggregate leaves its hop out of the manifest. The
/// requested tag is taken as granted and the aggregate completes.
#[tokio::test]
async fn test_hop_missing_from_manifest_assumes_request() {
    let eg_urn = aggregate_urn("eg.net");
    let spec = TopologyBuilder::new()
        .aggregate("eg.net", AggregateKind::Eg)
        .path(
            "link0",
            vec![hop("1", "eg.net", "eth0", VlanSet::range(100, 110), VlanSet::single(105))],
        )
        .build();
    let client = Arc::new(FixtureClient::new().with_script(
        &eg_urn,
        RpcOperation::Create,
        [RecordedResponse::grant_omitting("1")],
    ));
    let (mut orch, mut ctx) = setup(&spec, &client, StitchConfig::immediate());
    let eg = agg(&ctx, "eg.net");

    orch.allocate(&mut ctx, eg).await.unwrap();

    assert!(ctx.aggregate(eg).completed);
    let h1 = ctx.hop(hop_at(&ctx, "link0", "1"));
    assert_eq!(h1.link.vlan_suggested_manifest, Some(VlanSet::single(105)));
    assert_eq!(h1.link.vlan_range_manifest, Some(VlanSet::range(100, 110)));
    assert_eq!(client.operations(&eg_urn), vec![RpcOperation::Create]);
}

/// Scenario: the producer's hop is missing from its manifest while its
/// request said ANY. The recorded grant stays ANY, so the tag actually
/// in use is unknown and the consumer imports ANY in turn.
#[tokio::test]
async fn test_missing_hop_with_any_request_records_any() {
    let a_urn = aggregate_urn("a.net");
    let client = Arc::new(FixtureClient::new().with_script(
        &a_urn,
        RpcOperation::Create,
        [RecordedResponse::grant_omitting("1")],
    ));
    let (mut orch, mut ctx) = setup(
        &topology_fixtures::producer_consumer(),
        &client,
        StitchConfig::immediate(),
    );
    let (a, b) = (agg(&ctx, "a.net"), agg(&ctx, "b.net"));

    orch.allocate(&mut ctx, a).await.unwrap();
    assert_eq!(
        ctx.hop(hop_at(&ctx, "link0", "1")).link.vlan_suggested_manifest,
        Some(VlanSet::Any)
    );

    orch.allocate(&mut ctx, b).await.unwrap();
    let h2 = ctx.hop(hop_at(&ctx, "link0", "2"));
    assert_eq!(h2.link.vlan_suggested_request, VlanSet::Any);
    assert_eq!(h2.link.vlan_suggested_manifest, Some(VlanSet::single(100)));
}
