//! Sequential driver over one stitch.
//!
//! [`Stitcher`] asks a [`PathComputer`] for a topology, offers ready
//! aggregates to the [`ReservationOrch`] one at a time, and restarts with
//! fresh state when an aggregate asks for a new path computation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::aggregate::AggregateKind;
use crate::context::AttemptContext;
use crate::hints::ExclusionHints;
use crate::orch::{ReservationOrch, ReservationStats};
use crate::signal::{StitchResult, StitchSignal};
use crate::topology::{AggregateIndex, TopologySpec};
use crate::vlan_set::VlanSet;

/// Failure to obtain a topology.
#[derive(Debug, Clone, Error)]
pub enum PathComputeError {
    #[error("Path computation unavailable: {0}")]
    Unavailable(String),

    #[error("No path satisfies the request: {0}")]
    NoPath(String),
}

/// Source of computed topologies.
#[async_trait]
pub trait PathComputer: Send + Sync {
    /// Computes a topology for the `call`-th time, avoiding what `hints` names.
    async fn compute(
        &self,
        call: u32,
        hints: &ExclusionHints,
    ) -> Result<TopologySpec, PathComputeError>;
}

/// Final state of one hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HopReport {
    pub path: String,
    pub hop: String,
    pub urn: String,
    pub range: Option<VlanSet>,
    pub suggested: Option<VlanSet>,
}

/// Final state of one aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateReport {
    pub urn: String,
    pub kind: AggregateKind,
    pub completed: bool,
    pub allocate_tries: u32,
    pub local_pick_new_vlan_tries: u32,
    pub hops: Vec<HopReport>,
}

/// Summary of a successful stitch.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptReport {
    /// Path computations used.
    pub scs_calls: u32,
    pub aggregates: Vec<AggregateReport>,
    /// Circuit id per path, where one was assigned.
    pub circuits: BTreeMap<String, Option<String>>,
    /// Hints accumulated over all attempts.
    pub hints: ExclusionHints,
    pub stats: ReservationStats,
}

impl AttemptReport {
    pub fn from_context(ctx: &AttemptContext, scs_calls: u32, stats: &ReservationStats) -> Self {
        let aggregates = ctx
            .aggregates()
            .map(|(_, a)| AggregateReport {
                urn: a.urn.clone(),
                kind: a.kind,
                completed: a.completed,
                allocate_tries: a.allocate_tries,
                local_pick_new_vlan_tries: a.local_pick_new_vlan_tries,
                hops: a
                    .hops
                    .iter()
                    .map(|h| {
                        let hop = ctx.hop(*h);
                        HopReport {
                            path: ctx.path(hop.path).id.clone(),
                            hop: hop.id.clone(),
                            urn: hop.urn.clone(),
                            range: hop.link.vlan_range_manifest.clone(),
                            suggested: hop.link.vlan_suggested_manifest.clone(),
                        }
                    })
                    .collect(),
            })
            .collect();
        let circuits = ctx
            .paths()
            .map(|(_, p)| (p.id.clone(), p.global_id.clone()))
            .collect();
        Self {
            scs_calls,
            aggregates,
            circuits,
            hints: ctx.hints().clone(),
            stats: stats.clone(),
        }
    }

    /// Tag granted at a hop, if it was granted one.
    pub fn granted(&self, path: &str, hop: &str) -> Option<&VlanSet> {
        self.aggregates
            .iter()
            .flat_map(|a| a.hops.iter())
            .find(|h| h.path == path && h.hop == hop)
            .and_then(|h| h.suggested.as_ref())
    }
}

/// Runs a whole stitch: attempts, restarts and teardown.
pub struct Stitcher {
    orch: ReservationOrch,
    computer: Arc<dyn PathComputer>,
}

impl Stitcher {
    pub fn new(orch: ReservationOrch, computer: Arc<dyn PathComputer>) -> Self {
        Self { orch, computer }
    }

    pub fn orch(&self) -> &ReservationOrch {
        &self.orch
    }

    /// Stitches until every aggregate is reserved, an abort, or the path
    /// computation budget runs out.
    ///
    /// On abort every reservation still held is released before returning.
    #[instrument(skip(self), fields(slice = %self.orch.slice()))]
    pub async fn run(&mut self) -> StitchResult<AttemptReport> {
        let max_calls = self.orch.config().max_scs_calls;
        let seed = self.orch.config().rng_seed;
        let mut hints = ExclusionHints::new();

        for call in 1..=max_calls {
            let spec = self
                .computer
                .compute(call, &hints)
                .await
                .map_err(|e| StitchSignal::fatal("path computation", e.to_string()))?;
            let mut ctx = AttemptContext::from_spec(&spec, hints.clone(), call, seed)
                .map_err(|e| StitchSignal::fatal("topology", e.to_string()))?;
            info!(attempt = call, aggregates = ctx.aggregate_count(), "Starting attempt");

            match self.run_attempt(&mut ctx).await {
                Ok(()) => {
                    info!(attempt = call, "All aggregates reserved");
                    return Ok(AttemptReport::from_context(&ctx, call, self.orch.stats()));
                }
                Err(StitchSignal::RestartFromScs {
                    aggregate,
                    reason,
                    hints: new_hints,
                }) => {
                    info!(attempt = call, %aggregate, %reason, "Restarting from path computation");
                    self.orch.delete_all(&mut ctx).await?;
                    hints.merge(&new_hints);
                }
                Err(signal) => {
                    if let Err(teardown) = self.orch.delete_all(&mut ctx).await {
                        warn!(error = %teardown, "Teardown after abort failed; reservations may remain");
                    }
                    return Err(signal);
                }
            }
        }

        Err(StitchSignal::fatal(
            "path computation",
            format!("no working circuit after {} path computations", max_calls),
        ))
    }

    /// Offers ready aggregates until all are complete.
    ///
    /// Returns only restart or fatal signals; retries are handled here.
    pub async fn run_attempt(&mut self, ctx: &mut AttemptContext) -> StitchResult<()> {
        loop {
            if ctx.all_completed() {
                return Ok(());
            }

            let Some(agg) = ctx.ready_aggregates().first().copied() else {
                let pending: Vec<String> = ctx
                    .aggregates()
                    .filter(|(_, a)| !a.completed)
                    .map(|(_, a)| a.urn.clone())
                    .collect();
                return Err(StitchSignal::fatal(
                    format!("attempt {}", ctx.attempt),
                    format!("no aggregate ready while waiting on {}", pending.join(", ")),
                ));
            };

            self.offer(ctx, agg).await?;
        }
    }

    /// Allocates `agg`, re-offering it for as long as it asks to be retried
    /// and remains ready.
    async fn offer(&mut self, ctx: &mut AttemptContext, agg: AggregateIndex) -> StitchResult<()> {
        loop {
            match self.orch.allocate(ctx, agg).await {
                Ok(()) => return Ok(()),
                Err(StitchSignal::RetryAggregate { aggregate, reason }) => {
                    debug!(%aggregate, %reason, "Re-offering aggregate");
                    if !ctx.is_ready(agg) {
                        return Ok(());
                    }
                }
                Err(signal) => return Err(signal),
            }
        }
    }
}
