//! Per-aggregate reservation orchestration.
//!
//! [`ReservationOrch`] drives one aggregate at a time through reservation,
//! teardown and VLAN negotiation. All state it changes lives in the
//! [`AttemptContext`](crate::context::AttemptContext) passed to each call.
//! Outcomes other than success are reported as
//! [`StitchSignal`](crate::signal::StitchSignal)s.

mod allocate;
mod dcn;
mod delete;
mod negotiate;
#[cfg(test)]
pub(crate) mod test_support;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aggregate::{FailureClass, FlavorStrategy};
use crate::config::StitchConfig;
use crate::document::{ManifestParser, RequestBuilder};
use crate::error::ConfigError;
use crate::rpc::{AggregateClient, RpcError, RpcOperation, RpcResult};
use crate::signal::{StitchResult, StitchSignal};

/// External collaborators the orchestrator calls out to.
#[derive(Clone)]
pub struct StitchServices {
    pub client: Arc<dyn AggregateClient>,
    pub builder: Arc<dyn RequestBuilder>,
    pub parser: Arc<dyn ManifestParser>,
}

impl StitchServices {
    pub fn new(
        client: Arc<dyn AggregateClient>,
        builder: Arc<dyn RequestBuilder>,
        parser: Arc<dyn ManifestParser>,
    ) -> Self {
        Self {
            client,
            builder,
            parser,
        }
    }
}

/// Orchestrator statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReservationStats {
    /// Reservation requests sent.
    pub reservations_submitted: u64,
    /// Aggregates that reached completion.
    pub reservations_granted: u64,
    /// Delete calls issued.
    pub deletes: u64,
    /// Local tag re-picks.
    pub local_repairs: u64,
    /// Restarts requested from path computation.
    pub escalations: u64,
    /// Calls retried because the aggregate was busy.
    pub busy_retries: u64,
    /// DCN status polls.
    pub status_polls: u64,
}

/// Reservation and VLAN negotiation engine for one slice.
pub struct ReservationOrch {
    config: StitchConfig,
    services: StitchServices,
    slice: String,
    cancel: CancellationToken,
    stats: ReservationStats,
}

impl std::fmt::Debug for ReservationOrch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationOrch")
            .field("config", &self.config)
            .field("slice", &self.slice)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("stats", &self.stats)
            .finish()
    }
}

impl ReservationOrch {
    /// Creates an orchestrator for `slice`, rejecting a config with zero bounds.
    pub fn new(
        config: StitchConfig,
        services: StitchServices,
        slice: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            services,
            slice: slice.into(),
            cancel: CancellationToken::new(),
            stats: ReservationStats::default(),
        })
    }

    /// Uses `cancel` to abort pauses and in-flight calls.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &StitchConfig {
        &self.config
    }

    pub fn stats(&self) -> &ReservationStats {
        &self.stats
    }

    pub fn slice(&self) -> &str {
        &self.slice
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sleeps for `duration` unless cancelled first.
    pub(crate) async fn pause(&self, duration: Duration, context: &str) -> StitchResult<()> {
        pause_until(&self.cancel, duration, context).await
    }

    /// Issues one RPC with a timeout, retrying it unchanged while the
    /// aggregate reports busy.
    ///
    /// The outer result is the engine's verdict (cancellation or busy
    /// retries exhausted); the inner one is what the aggregate said.
    pub(crate) async fn call<T, F, Fut>(
        &mut self,
        aggregate: &str,
        flavor: &dyn FlavorStrategy,
        operation: RpcOperation,
        invoke: F,
    ) -> StitchResult<RpcResult<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RpcResult<T>>,
    {
        let cancel = self.cancel.clone();
        self.call_with(&cancel, aggregate, flavor, operation, invoke)
            .await
    }

    /// Like [`call`](Self::call), but ignores cancellation.
    ///
    /// Teardown goes through here so that an aborted stitch still releases
    /// what it holds. The timeout and busy bound still apply.
    pub(crate) async fn call_to_completion<T, F, Fut>(
        &mut self,
        aggregate: &str,
        flavor: &dyn FlavorStrategy,
        operation: RpcOperation,
        invoke: F,
    ) -> StitchResult<RpcResult<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RpcResult<T>>,
    {
        self.call_with(&CancellationToken::new(), aggregate, flavor, operation, invoke)
            .await
    }

    async fn call_with<T, F, Fut>(
        &mut self,
        cancel: &CancellationToken,
        aggregate: &str,
        flavor: &dyn FlavorStrategy,
        operation: RpcOperation,
        mut invoke: F,
    ) -> StitchResult<RpcResult<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RpcResult<T>>,
    {
        let timeout = self.config.rpc_timeout();
        let mut busy_tries = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(StitchSignal::cancelled(aggregate));
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(StitchSignal::cancelled(aggregate)),
                res = tokio::time::timeout(timeout, invoke()) => match res {
                    Ok(result) => result,
                    Err(_) => Err(RpcError::busy(
                        operation,
                        format!("no response within {}s", timeout.as_secs()),
                    )),
                },
            };

            match result {
                Err(err) if flavor.classify(&err) == FailureClass::Busy => {
                    busy_tries += 1;
                    self.stats.busy_retries += 1;
                    if busy_tries > self.config.busy_max_tries {
                        return Err(StitchSignal::fatal(
                            aggregate,
                            format!(
                                "{} still busy after {} retries: {}",
                                operation, self.config.busy_max_tries, err.message
                            ),
                        ));
                    }
                    warn!(
                        aggregate,
                        %operation,
                        try_num = busy_tries,
                        error = %err.message,
                        "Aggregate busy, retrying"
                    );
                    pause_until(cancel, self.config.busy_poll_interval(), aggregate).await?;
                }
                other => return Ok(other),
            }
        }
    }
}

async fn pause_until(cancel: &CancellationToken, duration: Duration, context: &str) -> StitchResult<()> {
    if cancel.is_cancelled() {
        return Err(StitchSignal::cancelled(context));
    }
    if duration.is_zero() {
        return Ok(());
    }
    debug!(context, secs = duration.as_secs(), "Pausing");
    tokio::select! {
        _ = cancel.cancelled() => Err(StitchSignal::cancelled(context)),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::test_support::{orch, orch_with, NoopClient};
    use super::*;
    use crate::aggregate::{strategy_for, AggregateKind};
    use crate::document::{ManifestDoc, RequestDoc};
    use crate::rpc::{AllocationState, ApiVersion, DeleteOutcome, RpcTarget};
    use crate::signal::SignalKind;

    /// Never answers a create.
    #[derive(Default)]
    struct SilentClient {
        creates: AtomicU32,
    }

    #[async_trait]
    impl AggregateClient for SilentClient {
        async fn create(&self, _: &RpcTarget, _: &RequestDoc) -> RpcResult<ManifestDoc> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
        async fn allocate(&self, _: &RpcTarget, _: &RequestDoc) -> RpcResult<ManifestDoc> {
            std::future::pending().await
        }
        async fn provision(&self, _: &RpcTarget) -> RpcResult<ManifestDoc> {
            std::future::pending().await
        }
        async fn delete(&self, _: &RpcTarget) -> RpcResult<DeleteOutcome> {
            Ok(DeleteOutcome::default())
        }
        async fn status(&self, _: &RpcTarget) -> RpcResult<AllocationState> {
            Ok(AllocationState::Ready)
        }
        async fn describe(&self, _: &RpcTarget) -> RpcResult<ManifestDoc> {
            std::future::pending().await
        }
    }

    fn target() -> RpcTarget {
        RpcTarget {
            urn: test_support::A.to_string(),
            url: String::new(),
            slice: "slice".to_string(),
            version: ApiVersion::V2,
        }
    }

    /// An aggregate that never responds is treated as busy: the call is
    /// retried up to the busy bound and then abandoned.
    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_busy() {
        let client = Arc::new(SilentClient::default());
        let config = StitchConfig {
            busy_max_tries: 2,
            rpc_timeout_secs: 30,
            ..StitchConfig::immediate()
        };
        let mut orch = orch_with(client.clone(), config);
        let flavor = strategy_for(AggregateKind::Standard);
        let (target, request) = (target(), RequestDoc::default());

        let signal = orch
            .call(test_support::A, flavor, RpcOperation::Create, || {
                client.create(&target, &request)
            })
            .await
            .unwrap_err();

        assert_eq!(signal.kind(), SignalKind::Fatal);
        assert!(signal.to_string().contains("no response within 30s"));
        assert_eq!(client.creates.load(Ordering::SeqCst), 3);
        assert_eq!(orch.stats().busy_retries, 3);
    }

    #[tokio::test]
    async fn test_teardown_call_ignores_cancellation() {
        let cancel = CancellationToken::new();
        let mut orch = orch(StitchConfig::immediate()).with_cancellation(cancel.clone());
        let client = Arc::new(NoopClient);
        let flavor = strategy_for(AggregateKind::Standard);
        let target = target();
        cancel.cancel();

        let signal = orch
            .call(test_support::A, flavor, RpcOperation::Delete, || client.delete(&target))
            .await
            .unwrap_err();
        assert_eq!(signal.kind(), SignalKind::Fatal);

        let outcome = orch
            .call_to_completion(test_support::A, flavor, RpcOperation::Delete, || {
                client.delete(&target)
            })
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_complete());
    }

    #[test]
    fn test_new_rejects_zero_bounds() {
        let config = StitchConfig {
            busy_max_tries: 0,
            ..StitchConfig::immediate()
        };
        let docs = Arc::new(test_support::NoopDocs);
        let err = ReservationOrch::new(
            config,
            StitchServices::new(Arc::new(NoopClient), docs.clone(), docs),
            "slice",
        )
        .unwrap_err();
        assert!(err.to_string().contains("busy_max_tries"));
    }
}
