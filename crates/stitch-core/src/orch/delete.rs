//! Reservation teardown.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::ReservationOrch;
use crate::aggregate::strategy_for;
use crate::context::AttemptContext;
use crate::rpc::RpcOperation;
use crate::signal::{StitchResult, StitchSignal};
use crate::topology::AggregateIndex;

impl ReservationOrch {
    /// Releases whatever `agg` holds.
    ///
    /// Local state is cleared and dependents are invalidated before the
    /// delete call goes out. The call itself is not cut short by
    /// cancellation. A partial teardown is fatal.
    #[instrument(skip(self, ctx), fields(aggregate = %ctx.aggregate(agg).urn))]
    pub async fn delete_reservation(
        &mut self,
        ctx: &mut AttemptContext,
        agg: AggregateIndex,
    ) -> StitchResult<()> {
        let urn = ctx.aggregate(agg).urn.clone();
        let flavor = strategy_for(ctx.aggregate(agg).kind);

        {
            let a = ctx.aggregate_mut(agg);
            a.manifest_doc = None;
            a.completed = false;
        }
        for hop in ctx.hops_of(agg) {
            ctx.hop_mut(hop).link.clear_manifest();
        }

        let invalidated = ctx.invalidate_dependents(agg);
        if !invalidated.is_empty() {
            let names: Vec<&str> = invalidated
                .iter()
                .map(|d| ctx.aggregate(*d).urn.as_str())
                .collect();
            info!(aggregate = %urn, dependents = ?names, "Invalidated dependent aggregates");
        }

        let target = ctx.aggregate(agg).target(&self.slice);
        let client = Arc::clone(&self.services.client);
        self.stats.deletes += 1;

        match self
            .call_to_completion(&urn, flavor, RpcOperation::Delete, || client.delete(&target))
            .await?
        {
            Ok(outcome) if outcome.is_complete() => {
                info!(aggregate = %urn, slivers = outcome.deleted.len(), "Reservation deleted");
                Ok(())
            }
            Ok(outcome) => Err(StitchSignal::fatal(
                &urn,
                format!(
                    "partial teardown, slivers not deleted: {}",
                    outcome.failed.join(", ")
                ),
            )),
            Err(err) => {
                warn!(aggregate = %urn, error = %err, "Delete failed");
                Err(StitchSignal::fatal(&urn, format!("delete failed: {}", err)))
            }
        }
    }

    /// Deletes every reservation held in the attempt, dependents first.
    ///
    /// Keeps going past a failed delete and returns the first failure.
    pub async fn delete_all(&mut self, ctx: &mut AttemptContext) -> StitchResult<()> {
        let order = ctx
            .graph()
            .topological_order(ctx.aggregate_count())
            .map_err(|agg| {
                StitchSignal::fatal(&ctx.aggregate(agg).urn, "dependency cycle during teardown")
            })?;

        let mut first_failure = None;
        for agg in order.into_iter().rev() {
            if !ctx.aggregate(agg).has_reservation() {
                continue;
            }
            if let Err(signal) = self.delete_reservation(ctx, agg).await {
                warn!(aggregate = %ctx.aggregate(agg).urn, error = %signal, "Teardown failed");
                first_failure.get_or_insert(signal);
            }
        }
        first_failure.map_or(Ok(()), Err)
    }
}
