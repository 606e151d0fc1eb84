//! VLAN negotiation after a failed or mismatched reservation.
//!
//! Both entry points record what was learned in the hops' unavailable sets
//! and then either re-pick tags locally and ask to be retried, or escalate
//! to a restart from path computation.

use tracing::{debug, info, instrument, warn};

use super::allocate::granted_tag;
use super::ReservationOrch;
use crate::aggregate::{strategy_for, FailureClass};
use crate::context::AttemptContext;
use crate::signal::{StitchResult, StitchSignal};
use crate::topology::{AggregateIndex, HopIndex, PathIndex};
use crate::vlan_set::VlanSet;

impl ReservationOrch {
    /// The aggregate accepted the request but granted tags outside it.
    ///
    /// Excludes both the requested and the granted tags, releases the
    /// reservation, then negotiates.
    #[instrument(skip(self, ctx, hops), fields(aggregate = %ctx.aggregate(agg).urn))]
    pub async fn handle_suggested_vlan_not_request(
        &mut self,
        ctx: &mut AttemptContext,
        agg: AggregateIndex,
        hops: Vec<HopIndex>,
    ) -> StitchResult<()> {
        let urn = ctx.aggregate(agg).urn.clone();
        let mut described = Vec::with_capacity(hops.len());

        for hop_idx in &hops {
            let requested = ctx.hop(*hop_idx).link.vlan_suggested_request.clone();
            let granted = granted_tag(ctx, *hop_idx);
            warn!(
                aggregate = %urn,
                hop = %ctx.hop(*hop_idx).id,
                %requested,
                %granted,
                "Granted tag is not the requested one"
            );
            described.push(format!(
                "hop {} requested {} but was granted {}",
                ctx.hop(*hop_idx).id,
                requested,
                granted
            ));
            ctx.exclude_vlans(*hop_idx, &requested);
            ctx.exclude_vlans(*hop_idx, &granted);
        }

        self.delete_reservation(ctx, agg).await?;
        let flavor = strategy_for(ctx.aggregate(agg).kind);
        self.pause(flavor.resource_release_pause(&self.config), &urn)
            .await?;

        self.decide(ctx, agg, &described.join("; "), FailureClass::VlanUnavailable, &hops)
    }

    /// The aggregate reported the requested tag unavailable at `failed`.
    ///
    /// Excludes the requested tags there and at every other hop of this
    /// aggregate on the same interface, then negotiates.
    #[instrument(skip(self, ctx, failed), fields(aggregate = %ctx.aggregate(agg).urn))]
    pub async fn handle_vlan_unavailable(
        &mut self,
        ctx: &mut AttemptContext,
        agg: AggregateIndex,
        reason: &str,
        failed: Vec<HopIndex>,
    ) -> StitchResult<()> {
        let hops = ctx.hops_of(agg);

        for hop_idx in &failed {
            let requested = ctx.hop(*hop_idx).link.vlan_suggested_request.clone();
            let hop_urn = ctx.hop(*hop_idx).urn.clone();
            ctx.exclude_vlans(*hop_idx, &requested);

            for peer in hops.iter().filter(|p| *p != hop_idx) {
                if ctx.hop(*peer).urn == hop_urn && ctx.exclude_vlans(*peer, &requested) {
                    debug!(hop = %ctx.hop(*peer).id, tags = %requested, "Propagated exclusion to same-interface hop");
                }
            }
        }

        self.decide(ctx, agg, reason, FailureClass::VlanUnavailable, &failed)
    }

    /// Repairs locally if possible, otherwise escalates.
    fn decide(
        &mut self,
        ctx: &mut AttemptContext,
        agg: AggregateIndex,
        reason: &str,
        class: FailureClass,
        affected: &[HopIndex],
    ) -> StitchResult<()> {
        ctx.aggregate_mut(agg).in_process = false;
        let urn = ctx.aggregate(agg).urn.clone();

        if class == FailureClass::VlanUnavailable {
            match self.local_repair_blocker(ctx, agg, affected) {
                None => match self.redo_locally(ctx, agg) {
                    Ok(()) => {
                        self.stats.local_repairs += 1;
                        info!(
                            aggregate = %urn,
                            try_num = ctx.aggregate(agg).local_pick_new_vlan_tries,
                            "Picked new tags locally"
                        );
                        return Err(StitchSignal::retry(&urn, reason));
                    }
                    Err(why) => debug!(aggregate = %urn, %why, "Local repair failed"),
                },
                Some(why) => debug!(aggregate = %urn, %why, "Local repair not possible"),
            }
        }

        self.escalate(ctx, agg, reason, class)
    }

    /// Why local repair is ruled out, if it is.
    pub(crate) fn local_repair_blocker(
        &self,
        ctx: &AttemptContext,
        agg: AggregateIndex,
        affected: &[HopIndex],
    ) -> Option<String> {
        let a = ctx.aggregate(agg);
        let bound = strategy_for(a.kind).new_vlan_tries_bound(&self.config);
        if a.local_pick_new_vlan_tries >= bound {
            return Some(format!("used all {} local tag picks", bound));
        }

        let hops = ctx.hops_of(agg);
        if let Some(h) = hops.iter().find(|h| ctx.hop(**h).import_vlans) {
            return Some(format!("hop {} imports its tag from another aggregate", ctx.hop(*h).id));
        }

        if let Some(h) = affected.iter().find(|h| ctx.hop(**h).candidate_range().is_empty()) {
            return Some(format!("no candidate tags left at hop {}", ctx.hop(*h).id));
        }

        for h in hops.iter().filter(|h| ctx.hop(**h).is_transit()) {
            for importer in ctx.importers_of(*h) {
                if !ctx.importers_of(importer).is_empty() {
                    return Some(format!(
                        "hop {} feeds hop {} which is itself imported",
                        ctx.hop(*h).id,
                        ctx.hop(importer).id
                    ));
                }
            }
        }

        None
    }

    /// Picks new tags for every path through `agg`.
    ///
    /// Transit hops of one path share a single new tag drawn from the
    /// intersection of their ranges. Translating hops are handled one by one
    /// and keep their suggestion if it is still usable.
    ///
    /// Only a successful pick counts against the local tries bound.
    pub(crate) fn redo_locally(&mut self, ctx: &mut AttemptContext, agg: AggregateIndex) -> Result<(), String> {
        for (path, hops) in ctx.hops_by_path(agg) {
            let (transit, translating): (Vec<HopIndex>, Vec<HopIndex>) =
                hops.into_iter().partition(|h| ctx.hop(*h).is_transit());

            if !transit.is_empty() {
                let mut range = VlanSet::Any;
                let mut unavailable = VlanSet::empty();
                for h in &transit {
                    let hop = ctx.hop(*h);
                    range = range.intersection(&hop.link.vlan_range_request);
                    unavailable = unavailable.union(hop.vlans_unavailable());
                }
                let range = range.difference(&unavailable);
                let claimed = claimed_elsewhere(ctx, agg, path, &transit);
                let pool = concrete(range.difference(&claimed));
                let producer = transit.iter().any(|h| ctx.hop(*h).link.vlan_producer);

                let pick = if producer {
                    VlanSet::Any
                } else {
                    match pool.random_element(ctx.rng_mut()) {
                        Some(tag) => VlanSet::single(tag),
                        None => {
                            return Err(format!("no common tag left on path {}", ctx.path(path).id));
                        }
                    }
                };
                debug!(path = %ctx.path(path).id, range = %range, pick = %pick, "New transit tag");

                for h in &transit {
                    let link = &mut ctx.hop_mut(*h).link;
                    link.vlan_range_request = range.clone();
                    link.vlan_suggested_request = pick.clone();
                }
            }

            for h in translating {
                let hop = ctx.hop(h);
                let range = hop.candidate_range();
                let claimed = claimed_elsewhere(ctx, agg, path, &[h]);
                let pool = concrete(range.difference(&claimed));
                let current = hop.link.vlan_suggested_request.clone();
                let still_usable = if current.is_any() {
                    hop.link.vlan_producer
                } else {
                    !current.is_empty() && current.is_subset_of(&pool)
                };
                let hop_id = hop.id.clone();

                let pick = if still_usable {
                    current
                } else {
                    match pool.random_element(ctx.rng_mut()) {
                        Some(tag) => VlanSet::single(tag),
                        None => return Err(format!("no tag left at hop {}", hop_id)),
                    }
                };
                debug!(hop = %hop_id, range = %range, pick = %pick, "New translating tag");

                let link = &mut ctx.hop_mut(h).link;
                link.vlan_range_request = range;
                link.vlan_suggested_request = pick;
            }
        }

        ctx.aggregate_mut(agg).local_pick_new_vlan_tries += 1;
        Ok(())
    }

    /// Gives up on this attempt.
    ///
    /// Always returns an error: fatal for a user-pinned aggregate, otherwise
    /// a restart carrying the accumulated hints. Exhausted or fatally failed
    /// aggregates are excluded from the next computation.
    pub(crate) fn escalate(
        &mut self,
        ctx: &mut AttemptContext,
        agg: AggregateIndex,
        reason: &str,
        class: FailureClass,
    ) -> StitchResult<()> {
        ctx.aggregate_mut(agg).in_process = false;
        let a = ctx.aggregate(agg);
        let urn = a.urn.clone();

        if a.user_requested {
            return Err(StitchSignal::fatal(
                &urn,
                format!(
                    "reservation failed at an aggregate the request names explicitly, so it cannot be routed around: {}",
                    reason
                ),
            ));
        }

        let bound = strategy_for(a.kind).new_vlan_tries_bound(&self.config);
        let exhausted = a.allocate_tries >= self.config.max_allocate_tries
            || a.local_pick_new_vlan_tries >= bound;
        if exhausted || class == FailureClass::Fatal {
            info!(aggregate = %urn, exhausted, ?class, "Excluding aggregate from next path computation");
            ctx.exclude_from_scs(agg);
        }

        self.stats.escalations += 1;
        warn!(aggregate = %urn, %reason, "Escalating to path computation");
        Err(StitchSignal::restart(&urn, reason, ctx.hints().clone()))
    }
}

/// Concrete tags suggested at hops of `agg` on other paths that share an
/// interface with any of `hops`.
fn claimed_elsewhere(
    ctx: &AttemptContext,
    agg: AggregateIndex,
    path: PathIndex,
    hops: &[HopIndex],
) -> VlanSet {
    let mut claimed = VlanSet::empty();
    for other in ctx.hops_of(agg) {
        let o = ctx.hop(other);
        if o.path == path || o.link.vlan_suggested_request.is_any() {
            continue;
        }
        if hops.iter().any(|h| ctx.hop(*h).urn == o.urn) {
            claimed = claimed.union(&o.link.vlan_suggested_request);
        }
    }
    claimed
}

/// An unconstrained pool means every legal tag.
fn concrete(pool: VlanSet) -> VlanSet {
    if pool.is_any() {
        VlanSet::full()
    } else {
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateKind;
    use crate::config::StitchConfig;
    use crate::hints::ExclusionHints;
    use crate::orch::test_support::{ctx_for, orch, A, B};
    use crate::signal::SignalKind;
    use crate::topology::{AggregateSpec, HopRef, HopSpec, PathSpec, TopologySpec};

    fn transit_pair() -> AttemptContext {
        ctx_for(vec![PathSpec {
            id: "p1".into(),
            hops: vec![
                HopSpec::new("1", A, "urn:a+eth0", VlanSet::range(100, 110), VlanSet::single(105)),
                HopSpec::new("2", A, "urn:a+eth0", VlanSet::range(100, 120), VlanSet::single(105)),
            ],
        }])
    }

    #[test]
    fn test_redo_locally_transit_hops_share_tag() {
        let mut ctx = transit_pair();
        let mut orch = orch(StitchConfig::immediate());
        ctx.exclude_vlans(HopIndex(0), &VlanSet::single(105));

        orch.redo_locally(&mut ctx, AggregateIndex(0)).unwrap();

        let h1 = ctx.hop(HopIndex(0)).link.clone();
        let h2 = ctx.hop(HopIndex(1)).link.clone();
        assert_eq!(h1.vlan_suggested_request, h2.vlan_suggested_request);
        assert_eq!(h1.vlan_range_request, VlanSet::range(100, 110).difference(&VlanSet::single(105)));
        let tag = h1.vlan_suggested_request.single_tag().unwrap();
        assert!((100..=110).contains(&tag) && tag != 105);
        assert_eq!(ctx.aggregate(AggregateIndex(0)).local_pick_new_vlan_tries, 1);
    }

    #[test]
    fn test_redo_locally_producer_keeps_any() {
        let mut ctx = ctx_for(vec![PathSpec {
            id: "p1".into(),
            hops: vec![HopSpec::new("1", A, "urn:a+eth0", VlanSet::range(100, 110), VlanSet::single(105)).producer()],
        }]);
        let mut orch = orch(StitchConfig::immediate());
        orch.redo_locally(&mut ctx, AggregateIndex(0)).unwrap();
        assert!(ctx.hop(HopIndex(0)).link.vlan_suggested_request.is_any());
    }

    /// Two paths through one interface; p2 holds 101, the only tag p1 has left.
    fn crowded_interface() -> AttemptContext {
        let mut ctx = ctx_for(vec![
            PathSpec {
                id: "p1".into(),
                hops: vec![HopSpec::new("1", A, "urn:a+eth0", VlanSet::range(100, 101), VlanSet::single(100))],
            },
            PathSpec {
                id: "p2".into(),
                hops: vec![HopSpec::new("1", A, "urn:a+eth0", VlanSet::range(100, 101), VlanSet::single(101))],
            },
        ]);
        ctx.exclude_vlans(HopIndex(0), &VlanSet::single(100));
        ctx
    }

    #[test]
    fn test_redo_locally_avoids_tags_claimed_on_other_paths() {
        let mut ctx = crowded_interface();
        let mut orch = orch(StitchConfig::immediate());
        let err = orch.redo_locally(&mut ctx, AggregateIndex(0)).unwrap_err();
        assert!(err.contains("no common tag"));
        // A failed pick spends no try
        assert_eq!(ctx.aggregate(AggregateIndex(0)).local_pick_new_vlan_tries, 0);
    }

    /// A pick that finds nothing must not push the aggregate into the
    /// exhausted branch, so it is not excluded from the next computation.
    #[test]
    fn test_failed_pick_does_not_exhaust_aggregate() {
        let mut ctx = crowded_interface();
        let config = StitchConfig {
            max_agg_new_vlan_tries: 1,
            ..StitchConfig::immediate()
        };
        let mut orch = orch(config);
        assert!(orch.local_repair_blocker(&ctx, AggregateIndex(0), &[HopIndex(0)]).is_none());

        let signal = orch
            .decide(&mut ctx, AggregateIndex(0), "all refused", FailureClass::VlanUnavailable, &[HopIndex(0)])
            .unwrap_err();

        assert_eq!(signal.kind(), SignalKind::RestartFromScs);
        assert_eq!(ctx.aggregate(AggregateIndex(0)).local_pick_new_vlan_tries, 0);
        assert!(!ctx.hop(HopIndex(0)).exclude_from_scs);
    }

    #[test]
    fn test_translating_hop_keeps_usable_suggestion() {
        let mut ctx = ctx_for(vec![PathSpec {
            id: "p1".into(),
            hops: vec![
                HopSpec::new("1", A, "urn:a+eth0", VlanSet::range(100, 110), VlanSet::single(105)).translating(),
                HopSpec::new("2", A, "urn:a+eth1", VlanSet::range(200, 210), VlanSet::single(205)).translating(),
            ],
        }]);
        let mut orch = orch(StitchConfig::immediate());
        ctx.exclude_vlans(HopIndex(0), &VlanSet::single(105));
        orch.redo_locally(&mut ctx, AggregateIndex(0)).unwrap();
        assert_ne!(ctx.hop(HopIndex(0)).link.vlan_suggested_request, VlanSet::single(105));
        assert_eq!(ctx.hop(HopIndex(1)).link.vlan_suggested_request, VlanSet::single(205));
    }

    #[test]
    fn test_blocker_import() {
        let ctx = ctx_for(vec![PathSpec {
            id: "p1".into(),
            hops: vec![
                HopSpec::new("1", A, "urn:a+eth0", VlanSet::range(100, 110), VlanSet::single(105)),
                HopSpec::new("2", B, "urn:b+eth0", VlanSet::range(100, 110), VlanSet::single(105))
                    .importing(HopRef::new("p1", "1")),
            ],
        }]);
        let orch = orch(StitchConfig::immediate());
        let why = orch.local_repair_blocker(&ctx, AggregateIndex(1), &[HopIndex(1)]).unwrap();
        assert!(why.contains("imports"));
        assert!(orch.local_repair_blocker(&ctx, AggregateIndex(0), &[HopIndex(0)]).is_none());
    }

    #[test]
    fn test_blocker_two_level_fan_out() {
        let ctx = ctx_for(vec![PathSpec {
            id: "p1".into(),
            hops: vec![
                HopSpec::new("1", A, "urn:a+eth0", VlanSet::range(100, 110), VlanSet::single(105)),
                HopSpec::new("2", B, "urn:b+eth0", VlanSet::range(100, 110), VlanSet::single(105))
                    .importing(HopRef::new("p1", "1")),
                HopSpec::new("3", B, "urn:b+eth1", VlanSet::range(100, 110), VlanSet::single(105))
                    .importing(HopRef::new("p1", "2")),
            ],
        }]);
        let orch = orch(StitchConfig::immediate());
        let why = orch.local_repair_blocker(&ctx, AggregateIndex(0), &[HopIndex(0)]).unwrap();
        assert!(why.contains("itself imported"));
    }

    #[test]
    fn test_blocker_bounded_by_local_tries() {
        let mut ctx = transit_pair();
        let config = StitchConfig {
            max_agg_new_vlan_tries: 2,
            ..StitchConfig::immediate()
        };
        let mut orch = orch(config);
        for _ in 0..2 {
            assert!(orch.local_repair_blocker(&ctx, AggregateIndex(0), &[HopIndex(0)]).is_none());
            orch.redo_locally(&mut ctx, AggregateIndex(0)).unwrap();
        }
        assert!(orch.local_repair_blocker(&ctx, AggregateIndex(0), &[HopIndex(0)]).is_some());
    }

    #[tokio::test]
    async fn test_same_interface_exclusion_propagates() {
        let mut ctx = transit_pair();
        for h in [HopIndex(0), HopIndex(1)] {
            ctx.hop_mut(h).link.vlan_suggested_request = VlanSet::single(200);
            ctx.hop_mut(h).link.vlan_range_request = VlanSet::range(195, 205);
        }
        let mut orch = orch(StitchConfig::immediate());

        let signal = orch
            .handle_vlan_unavailable(&mut ctx, AggregateIndex(0), "tag 200 taken", vec![HopIndex(0)])
            .await
            .unwrap_err();

        assert_eq!(signal.kind(), SignalKind::RetryAggregate);
        for h in [HopIndex(0), HopIndex(1)] {
            let hop = ctx.hop(h);
            assert!(hop.vlans_unavailable().contains(200));
            assert!(!hop.link.vlan_range_request.contains(200));
            assert_ne!(hop.link.vlan_suggested_request, VlanSet::single(200));
        }
    }

    #[test]
    fn test_escalate_user_requested_is_fatal() {
        let spec = TopologySpec {
            aggregates: vec![AggregateSpec {
                user_requested: true,
                ..AggregateSpec::new(A, AggregateKind::Standard)
            }],
            paths: vec![PathSpec {
                id: "p1".into(),
                hops: vec![HopSpec::new("1", A, "urn:a+eth0", VlanSet::range(100, 110), VlanSet::single(105))],
            }],
            ..Default::default()
        };
        let mut ctx = AttemptContext::from_spec(&spec, ExclusionHints::new(), 1, None).unwrap();
        let mut orch = orch(StitchConfig::immediate());
        let signal = orch
            .escalate(&mut ctx, AggregateIndex(0), "nope", FailureClass::VlanUnavailable)
            .unwrap_err();
        assert_eq!(signal.kind(), SignalKind::Fatal);
    }

    #[test]
    fn test_escalate_fatal_excludes_hops() {
        let mut ctx = transit_pair();
        let mut orch = orch(StitchConfig::immediate());
        let signal = orch
            .escalate(&mut ctx, AggregateIndex(0), "malformed", FailureClass::Fatal)
            .unwrap_err();
        match signal {
            StitchSignal::RestartFromScs { hints, .. } => assert!(hints.is_excluded("urn:a+eth0")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(ctx.hop(HopIndex(0)).exclude_from_scs);
        assert_eq!(orch.stats().escalations, 1);
    }
}
