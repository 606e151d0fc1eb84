//! Status polling for aggregates that confirm reservations asynchronously.

use std::sync::Arc;

use tracing::{debug, info};

use super::ReservationOrch;
use crate::aggregate::FlavorStrategy;
use crate::document::ManifestDoc;
use crate::rpc::{RpcOperation, RpcResult, RpcTarget};
use crate::signal::StitchResult;

/// Result of waiting for a reservation to settle.
#[derive(Debug)]
pub(crate) enum DcnOutcome {
    /// Ready; carries the follow-up describe result.
    Ready(RpcResult<ManifestDoc>),
    /// Failed or never became ready.
    Failed(String),
}

impl ReservationOrch {
    /// Polls status until the reservation is ready or failed, at most
    /// `dcn_poll_max_tries` times. On ready, fetches the manifest again,
    /// since the accept response is not authoritative.
    pub(crate) async fn await_dcn_ready(
        &mut self,
        urn: &str,
        flavor: &dyn FlavorStrategy,
        target: &RpcTarget,
    ) -> StitchResult<DcnOutcome> {
        let client = Arc::clone(&self.services.client);
        let max_polls = self.config.dcn_poll_max_tries;
        let mut last_state = None;

        for poll in 1..=max_polls {
            self.stats.status_polls += 1;
            match self
                .call(urn, flavor, RpcOperation::Status, || client.status(target))
                .await?
            {
                Ok(state) if state.is_ready() => {
                    info!(aggregate = urn, %state, polls = poll, "Reservation ready");
                    let described = self
                        .call(urn, flavor, RpcOperation::Describe, || client.describe(target))
                        .await?;
                    return Ok(DcnOutcome::Ready(described));
                }
                Ok(state) if state.is_failed() => {
                    return Ok(DcnOutcome::Failed(format!(
                        "reservation reported {} after {} polls",
                        state, poll
                    )));
                }
                Ok(state) => {
                    debug!(aggregate = urn, %state, poll, max_polls, "Reservation not ready yet");
                    last_state = Some(state);
                }
                Err(err) => {
                    return Ok(DcnOutcome::Failed(format!("status check failed: {}", err)));
                }
            }

            if poll < max_polls {
                self.pause(self.config.dcn_poll_interval(), urn).await?;
            }
        }

        let state = last_state
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(DcnOutcome::Failed(format!(
            "reservation still {} after {} polls",
            state, max_polls
        )))
    }
}
