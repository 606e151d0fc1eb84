//! Reservation of one aggregate.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::dcn::DcnOutcome;
use super::ReservationOrch;
use crate::aggregate::{strategy_for, FailureClass, FlavorStrategy};
use crate::context::AttemptContext;
use crate::document::{ManifestDoc, ManifestLookup, RequestDoc};
use crate::rpc::{RpcError, RpcOperation, RpcResult, RpcTarget};
use crate::signal::{StitchResult, StitchSignal};
use crate::topology::{AggregateIndex, HopIndex};
use crate::vlan_set::VlanSet;

/// What the imported tags imply for an aggregate's standing reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Redo {
    /// Nothing held, or nothing reusable; submit.
    Fresh,
    /// The held reservation still fits the new request.
    AlreadyDone,
    /// The held reservation conflicts with the new request; delete first.
    MustDelete,
    /// An imported tag is already known unusable at these hops.
    ImportUnavailable(Vec<HopIndex>),
}

impl ReservationOrch {
    /// Runs one reservation attempt at `agg`.
    ///
    /// Returns `Ok(())` once the aggregate is completed. Any other outcome
    /// is a [`StitchSignal`]: retry this aggregate, restart from path
    /// computation, or abort.
    #[instrument(skip(self, ctx), fields(aggregate = %ctx.aggregate(agg).urn))]
    pub async fn allocate(&mut self, ctx: &mut AttemptContext, agg: AggregateIndex) -> StitchResult<()> {
        self.check_preconditions(ctx, agg)?;
        let flavor = strategy_for(ctx.aggregate(agg).kind);
        let urn = ctx.aggregate(agg).urn.clone();

        match self.copy_vlans_and_detect_redo(ctx, agg)? {
            Redo::AlreadyDone => {
                info!(aggregate = %urn, "Existing reservation still matches imported tags");
                ctx.aggregate_mut(agg).completed = true;
                return Ok(());
            }
            Redo::ImportUnavailable(hops) => {
                let reason = "imported VLAN tag is already known unavailable here";
                return self.handle_vlan_unavailable(ctx, agg, reason, hops).await;
            }
            Redo::MustDelete => {
                info!(aggregate = %urn, "Imported tags changed; deleting existing reservation");
                self.delete_reservation(ctx, agg).await?;
                self.pause(flavor.resource_release_pause(&self.config), &urn)
                    .await?;
            }
            Redo::Fresh => {}
        }

        self.validate_requests(ctx, agg)?;

        let total = ctx.note_allocation();
        if total > self.config.max_allocations_per_attempt {
            return Err(StitchSignal::fatal(
                &urn,
                format!(
                    "exceeded {} reservations in attempt {}",
                    self.config.max_allocations_per_attempt, ctx.attempt
                ),
            ));
        }

        let tries = {
            let a = ctx.aggregate_mut(agg);
            a.allocate_tries += 1;
            a.allocate_tries
        };
        if tries > self.config.max_allocate_tries {
            let reason = format!("gave up after {} reservation tries", tries - 1);
            return self.escalate(ctx, agg, &reason, FailureClass::Unknown);
        }

        ctx.aggregate_mut(agg).in_process = true;
        let request = self.build_request(ctx, agg)?;
        let target = ctx.aggregate(agg).target(&self.slice);

        self.stats.reservations_submitted += 1;
        info!(aggregate = %urn, try_num = tries, version = ?target.version, "Submitting reservation");

        let manifest = match self.reserve(&urn, flavor, &target, &request).await? {
            Ok(manifest) => manifest,
            Err(err) => return self.handle_reservation_error(ctx, agg, flavor, err).await,
        };
        ctx.aggregate_mut(agg).manifest_doc = Some(manifest.clone());

        let manifest = if flavor.polls_status() {
            match self.await_dcn_ready(&urn, flavor, &target).await? {
                DcnOutcome::Ready(Ok(manifest)) => manifest,
                DcnOutcome::Ready(Err(err)) => {
                    warn!(aggregate = %urn, error = %err, "Reservation ready but describe failed");
                    self.delete_reservation(ctx, agg).await?;
                    return self.handle_reservation_error(ctx, agg, flavor, err).await;
                }
                DcnOutcome::Failed(reason) => {
                    warn!(aggregate = %urn, %reason, "Reservation did not become ready");
                    self.delete_reservation(ctx, agg).await?;
                    let hops = ctx.hops_of(agg);
                    return self.handle_vlan_unavailable(ctx, agg, &reason, hops).await;
                }
            }
        } else {
            manifest
        };

        let mismatched = self.record_manifest(ctx, agg, flavor, manifest)?;
        if !mismatched.is_empty() {
            return self.handle_suggested_vlan_not_request(ctx, agg, mismatched).await;
        }

        let a = ctx.aggregate_mut(agg);
        a.completed = true;
        a.in_process = false;
        self.stats.reservations_granted += 1;
        info!(aggregate = %urn, "Reservation complete");
        Ok(())
    }

    fn check_preconditions(&self, ctx: &AttemptContext, agg: AggregateIndex) -> StitchResult<()> {
        let a = ctx.aggregate(agg);
        if a.in_process {
            return Err(StitchSignal::fatal(&a.urn, "allocate called while already in process"));
        }
        if a.completed {
            return Err(StitchSignal::fatal(&a.urn, "allocate called on a completed aggregate"));
        }
        if let Some(dep) = ctx
            .graph()
            .depends_on(agg)
            .find(|dep| !ctx.aggregate(*dep).completed)
        {
            return Err(StitchSignal::fatal(
                &a.urn,
                format!("dependency {} is not complete", ctx.aggregate(dep).urn),
            ));
        }
        Ok(())
    }

    /// Copies imported grants into the request of every importing hop and
    /// decides whether a held reservation can stand.
    pub(crate) fn copy_vlans_and_detect_redo(
        &self,
        ctx: &mut AttemptContext,
        agg: AggregateIndex,
    ) -> StitchResult<Redo> {
        let urn = ctx.aggregate(agg).urn.clone();
        let had_manifest = ctx.aggregate(agg).has_reservation();
        let mut all_compatible = had_manifest;
        let mut unavailable = Vec::new();

        for hop_idx in ctx.hops_of(agg) {
            let hop = ctx.hop(hop_idx);
            let (new_range, new_suggested) = match (hop.import_vlans, hop.import_vlans_from) {
                (true, Some(src_idx)) => {
                    let source = ctx.hop(src_idx);
                    let Some(src_suggested) = source.link.vlan_suggested_manifest.clone() else {
                        return Err(StitchSignal::fatal(
                            &urn,
                            format!("hop {} imports from {} which has no grant", hop.id, source.id),
                        ));
                    };
                    if src_suggested.is_any() && !hop.link.vlan_consumer {
                        return Err(StitchSignal::fatal(
                            &urn,
                            format!("hop {} received ANY but is not a VLAN consumer", hop.id),
                        ));
                    }
                    let src_range = source
                        .link
                        .vlan_range_manifest
                        .clone()
                        .unwrap_or_else(|| src_suggested.clone());
                    let range = src_range
                        .intersection(&hop.link.vlan_range_request)
                        .difference(hop.vlans_unavailable());
                    if !src_suggested.is_any() && !src_suggested.is_subset_of(&range) {
                        debug!(hop = %hop.id, tag = %src_suggested, range = %range, "Imported tag unusable");
                        unavailable.push(hop_idx);
                    }
                    (range, src_suggested)
                }
                _ => (
                    hop.link.vlan_range_request.clone(),
                    hop.link.vlan_suggested_request.clone(),
                ),
            };

            let compatible = hop
                .link
                .vlan_suggested_manifest
                .as_ref()
                .is_some_and(|granted| granted.is_subset_of(&new_suggested));
            all_compatible &= compatible;

            let link = &mut ctx.hop_mut(hop_idx).link;
            link.vlan_range_request = new_range;
            link.vlan_suggested_request = new_suggested;
        }

        // A held reservation is either reused or released, never submitted over.
        Ok(if !unavailable.is_empty() {
            Redo::ImportUnavailable(unavailable)
        } else if had_manifest && !all_compatible {
            Redo::MustDelete
        } else if all_compatible {
            Redo::AlreadyDone
        } else {
            Redo::Fresh
        })
    }

    /// Rejects requests that could only come from a faulty computation.
    pub(crate) fn validate_requests(&self, ctx: &AttemptContext, agg: AggregateIndex) -> StitchResult<()> {
        let urn = &ctx.aggregate(agg).urn;
        let hops = ctx.hops_of(agg);

        for (i, a_idx) in hops.iter().enumerate() {
            let a = ctx.hop(*a_idx);
            let suggested = &a.link.vlan_suggested_request;
            if suggested.is_any() && !(a.link.vlan_producer || (a.import_vlans && a.link.vlan_consumer)) {
                return Err(StitchSignal::fatal(
                    urn,
                    format!("hop {} suggests ANY but the aggregate is not a VLAN producer", a.id),
                ));
            }
            if suggested.is_any() || suggested.is_empty() {
                continue;
            }
            for b_idx in &hops[i + 1..] {
                let b = ctx.hop(*b_idx);
                if a.urn != b.urn || a.path == b.path {
                    continue;
                }
                let shared = suggested.intersection(&b.link.vlan_suggested_request);
                if !b.link.vlan_suggested_request.is_any() && !shared.is_empty() {
                    return Err(StitchSignal::fatal(
                        urn,
                        format!(
                            "hops {} and {} share interface {} and both request tag {}",
                            a.id, b.id, a.urn, shared
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn build_request(&self, ctx: &mut AttemptContext, agg: AggregateIndex) -> StitchResult<RequestDoc> {
        let view = ctx.request_view(agg);
        let request = self
            .services
            .builder
            .build(ctx.base_request(), &view)
            .map_err(|e| StitchSignal::fatal(&view.aggregate_urn, e.to_string()))?;
        ctx.aggregate_mut(agg).request_doc = Some(request.clone());
        Ok(request)
    }

    /// Submits the request: `create` for v2, `allocate` plus `provision` for v3.
    async fn reserve(
        &mut self,
        urn: &str,
        flavor: &dyn FlavorStrategy,
        target: &RpcTarget,
        request: &RequestDoc,
    ) -> StitchResult<RpcResult<ManifestDoc>> {
        let client = Arc::clone(&self.services.client);

        if !target.version.is_two_phase() {
            return self
                .call(urn, flavor, RpcOperation::Create, || client.create(target, request))
                .await;
        }

        if let Err(err) = self
            .call(urn, flavor, RpcOperation::Allocate, || client.allocate(target, request))
            .await?
        {
            return Ok(Err(err));
        }

        match self
            .call(urn, flavor, RpcOperation::Provision, || client.provision(target))
            .await?
        {
            Ok(manifest) => Ok(Ok(manifest)),
            Err(err) => {
                warn!(aggregate = urn, error = %err, "Provision failed; deleting allocation");
                self.stats.deletes += 1;
                match self
                    .call_to_completion(urn, flavor, RpcOperation::Delete, || client.delete(target))
                    .await?
                {
                    Ok(outcome) if outcome.is_complete() => Ok(Err(err)),
                    Ok(outcome) => Err(StitchSignal::fatal(
                        urn,
                        format!("could not release allocation: {}", outcome.failed.join(", ")),
                    )),
                    Err(delete_err) => Err(StitchSignal::fatal(
                        urn,
                        format!("could not release allocation: {}", delete_err),
                    )),
                }
            }
        }
    }

    /// Routes a failed reservation call by its class.
    pub(crate) async fn handle_reservation_error(
        &mut self,
        ctx: &mut AttemptContext,
        agg: AggregateIndex,
        flavor: &dyn FlavorStrategy,
        err: RpcError,
    ) -> StitchResult<()> {
        let class = flavor.classify(&err);
        warn!(aggregate = %ctx.aggregate(agg).urn, error = %err, ?class, "Reservation failed");

        if class != FailureClass::VlanUnavailable {
            return self.escalate(ctx, agg, &err.to_string(), class);
        }

        let urns = ctx.hop_urns(agg);
        let failed: Vec<HopIndex> = match flavor.failed_hop_hint(&err, &urns) {
            Some(blamed) => ctx
                .hops_of(agg)
                .into_iter()
                .filter(|h| ctx.hop(*h).urn == blamed)
                .collect(),
            None => ctx.hops_of(agg),
        };
        self.handle_vlan_unavailable(ctx, agg, &err.to_string(), failed)
            .await
    }

    /// Reads grants out of `manifest` into the hops at `agg`.
    ///
    /// Returns hops whose granted suggested tag lies outside the request.
    pub(crate) fn record_manifest(
        &self,
        ctx: &mut AttemptContext,
        agg: AggregateIndex,
        flavor: &dyn FlavorStrategy,
        manifest: ManifestDoc,
    ) -> StitchResult<Vec<HopIndex>> {
        let urn = ctx.aggregate(agg).urn.clone();
        let mut mismatched = Vec::new();

        for hop_idx in ctx.hops_of(agg) {
            let hop = ctx.hop(hop_idx);
            let path_idx = hop.path;
            let path_id = ctx.path(path_idx).id.clone();
            let lookup = self
                .services
                .parser
                .lookup(&manifest, &hop.id, &path_id)
                .map_err(|e| StitchSignal::fatal(&urn, e.to_string()))?;

            let (range, suggested) = match lookup {
                ManifestLookup::Found(grant) => {
                    if let Some(global_id) = grant.path_global_id.as_deref() {
                        if ctx.path_mut(path_idx).assign_global_id(global_id) {
                            debug!(path = %path_id, global_id, "Circuit id assigned");
                        }
                    }
                    (grant.range, grant.suggested)
                }
                ManifestLookup::NotFound => {
                    let hop = ctx.hop(hop_idx);
                    if flavor.tolerates_missing_hops() {
                        debug!(aggregate = %urn, hop = %hop.id, "Hop absent from manifest; assuming request granted");
                    } else {
                        warn!(aggregate = %urn, hop = %hop.id, "Hop absent from manifest; assuming request granted (unverified)");
                    }
                    (
                        hop.link.vlan_range_request.clone(),
                        hop.link.vlan_suggested_request.clone(),
                    )
                }
            };

            let hop = ctx.hop_mut(hop_idx);
            if !suggested.is_subset_of(&hop.link.vlan_suggested_request) {
                mismatched.push(hop_idx);
            }
            hop.link.vlan_range_manifest = Some(range);
            hop.link.vlan_suggested_manifest = Some(suggested);
        }

        ctx.aggregate_mut(agg).manifest_doc = Some(manifest);
        Ok(mismatched)
    }
}

/// Tag a hop was granted, or empty if none.
pub(crate) fn granted_tag(ctx: &AttemptContext, hop: HopIndex) -> VlanSet {
    ctx.hop(hop)
        .link
        .vlan_suggested_manifest
        .clone()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StitchConfig;
    use crate::orch::test_support::{ctx_for, orch, A};
    use crate::signal::SignalKind;
    use crate::topology::{HopSpec, PathSpec};
    use pretty_assertions::assert_eq;

    fn on_path(id: &str, hop: HopSpec) -> PathSpec {
        PathSpec {
            id: id.into(),
            hops: vec![hop],
        }
    }

    #[test]
    fn test_same_interface_on_two_paths_cannot_share_tag() {
        let ctx = ctx_for(vec![
            on_path("p1", HopSpec::new("1", A, "urn:a+eth0", VlanSet::range(100, 110), VlanSet::single(105))),
            on_path("p2", HopSpec::new("1", A, "urn:a+eth0", VlanSet::range(100, 110), VlanSet::single(105))),
        ]);
        let orch = orch(StitchConfig::immediate());

        let signal = orch.validate_requests(&ctx, AggregateIndex(0)).unwrap_err();
        assert_eq!(signal.kind(), SignalKind::Fatal);
        assert!(signal.to_string().contains("urn:a+eth0"));
    }

    #[test]
    fn test_same_interface_on_two_paths_with_distinct_tags() {
        let ctx = ctx_for(vec![
            on_path("p1", HopSpec::new("1", A, "urn:a+eth0", VlanSet::range(100, 110), VlanSet::single(105))),
            on_path("p2", HopSpec::new("1", A, "urn:a+eth0", VlanSet::range(100, 110), VlanSet::single(106))),
        ]);
        let orch = orch(StitchConfig::immediate());
        assert!(orch.validate_requests(&ctx, AggregateIndex(0)).is_ok());
    }

    /// Hops of one path on the same interface carry the same transit tag.
    #[test]
    fn test_same_interface_on_one_path_may_share_tag() {
        let ctx = ctx_for(vec![PathSpec {
            id: "p1".into(),
            hops: vec![
                HopSpec::new("1", A, "urn:a+eth0", VlanSet::range(100, 110), VlanSet::single(105)),
                HopSpec::new("2", A, "urn:a+eth0", VlanSet::range(100, 110), VlanSet::single(105)),
            ],
        }]);
        let orch = orch(StitchConfig::immediate());
        assert!(orch.validate_requests(&ctx, AggregateIndex(0)).is_ok());
    }

    #[test]
    fn test_any_requires_producer() {
        let orch = orch(StitchConfig::immediate());

        let ctx = ctx_for(vec![on_path(
            "p1",
            HopSpec::new("1", A, "urn:a+eth0", VlanSet::range(100, 110), VlanSet::Any),
        )]);
        let signal = orch.validate_requests(&ctx, AggregateIndex(0)).unwrap_err();
        assert_eq!(signal.kind(), SignalKind::Fatal);
        assert!(signal.to_string().contains("not a VLAN producer"));

        let ctx = ctx_for(vec![on_path(
            "p1",
            HopSpec::new("1", A, "urn:a+eth0", VlanSet::range(100, 110), VlanSet::Any).producer(),
        )]);
        assert!(orch.validate_requests(&ctx, AggregateIndex(0)).is_ok());
    }

    fn single_hop() -> AttemptContext {
        ctx_for(vec![on_path(
            "p1",
            HopSpec::new("1", A, "urn:a+eth0", VlanSet::range(100, 110), VlanSet::single(105)),
        )])
    }

    #[test]
    fn test_redo_without_reservation_is_fresh() {
        let mut ctx = single_hop();
        let orch = orch(StitchConfig::immediate());
        assert_eq!(
            orch.copy_vlans_and_detect_redo(&mut ctx, AggregateIndex(0)).unwrap(),
            Redo::Fresh
        );
    }

    #[test]
    fn test_redo_reuses_matching_reservation() {
        let mut ctx = single_hop();
        let orch = orch(StitchConfig::immediate());
        ctx.aggregate_mut(AggregateIndex(0)).manifest_doc = Some(ManifestDoc::default());
        ctx.hop_mut(HopIndex(0)).link.vlan_suggested_manifest = Some(VlanSet::single(105));

        assert_eq!(
            orch.copy_vlans_and_detect_redo(&mut ctx, AggregateIndex(0)).unwrap(),
            Redo::AlreadyDone
        );
    }

    /// A reservation is held but none of its hops carries a grant; it must
    /// be released rather than submitted over.
    #[test]
    fn test_redo_releases_reservation_without_grants() {
        let mut ctx = single_hop();
        let orch = orch(StitchConfig::immediate());
        ctx.aggregate_mut(AggregateIndex(0)).manifest_doc = Some(ManifestDoc::default());

        assert_eq!(
            orch.copy_vlans_and_detect_redo(&mut ctx, AggregateIndex(0)).unwrap(),
            Redo::MustDelete
        );
    }
}
