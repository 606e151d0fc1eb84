//! Services and topologies shared by the orchestrator unit tests.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ReservationOrch, StitchServices};
use crate::aggregate::AggregateKind;
use crate::config::StitchConfig;
use crate::context::AttemptContext;
use crate::document::{
    DocumentError, ManifestDoc, ManifestLookup, ManifestParser, RequestBuilder, RequestDoc,
    RequestView,
};
use crate::hints::ExclusionHints;
use crate::rpc::{AggregateClient, AllocationState, DeleteOutcome, RpcError, RpcOperation, RpcResult, RpcTarget};
use crate::topology::{AggregateSpec, PathSpec, TopologySpec};

pub(crate) const A: &str = "urn:publicid:IDN+a.net+authority+cm";
pub(crate) const B: &str = "urn:publicid:IDN+b.net+authority+cm";

/// Accepts everything and returns empty manifests.
pub(crate) struct NoopClient;

#[async_trait]
impl AggregateClient for NoopClient {
    async fn create(&self, _: &RpcTarget, _: &RequestDoc) -> RpcResult<ManifestDoc> {
        Ok(ManifestDoc::default())
    }
    async fn allocate(&self, _: &RpcTarget, _: &RequestDoc) -> RpcResult<ManifestDoc> {
        Ok(ManifestDoc::default())
    }
    async fn provision(&self, _: &RpcTarget) -> RpcResult<ManifestDoc> {
        Ok(ManifestDoc::default())
    }
    async fn delete(&self, _: &RpcTarget) -> RpcResult<DeleteOutcome> {
        Ok(DeleteOutcome::default())
    }
    async fn status(&self, _: &RpcTarget) -> RpcResult<AllocationState> {
        Ok(AllocationState::Ready)
    }
    async fn describe(&self, _: &RpcTarget) -> RpcResult<ManifestDoc> {
        Err(RpcError::fatal(RpcOperation::Describe, "unused"))
    }
}

/// Passes the base request through; finds no hop in any manifest.
pub(crate) struct NoopDocs;

impl RequestBuilder for NoopDocs {
    fn build(&self, base: &str, _: &RequestView) -> Result<RequestDoc, DocumentError> {
        Ok(RequestDoc(base.to_string()))
    }
}

impl ManifestParser for NoopDocs {
    fn lookup(&self, _: &ManifestDoc, _: &str, _: &str) -> Result<ManifestLookup, DocumentError> {
        Ok(ManifestLookup::NotFound)
    }
}

pub(crate) fn orch_with(client: Arc<dyn AggregateClient>, config: StitchConfig) -> ReservationOrch {
    let docs = Arc::new(NoopDocs);
    ReservationOrch::new(config, StitchServices::new(client, docs.clone(), docs), "slice").unwrap()
}

pub(crate) fn orch(config: StitchConfig) -> ReservationOrch {
    orch_with(Arc::new(NoopClient), config)
}

/// Standard aggregates `A` and `B` over `paths`.
pub(crate) fn ctx_for(paths: Vec<PathSpec>) -> AttemptContext {
    let spec = TopologySpec {
        aggregates: vec![
            AggregateSpec::new(A, AggregateKind::Standard),
            AggregateSpec::new(B, AggregateKind::Standard),
        ],
        paths,
        ..Default::default()
    };
    AttemptContext::from_spec(&spec, ExclusionHints::new(), 1, Some(11)).unwrap()
}
