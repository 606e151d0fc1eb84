//! Aggregate client replaying recorded responses.
//!
//! Responses are queued per aggregate URN and operation. Each call takes
//! the next one; the last response of a queue is sticky and answers every
//! later call. Operations with no script fall back to a well-behaved
//! aggregate: grants echo the request, deletes succeed, status is ready.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stitch_core::{
    AggregateClient, AllocationState, DeleteOutcome, ManifestDoc, RequestDoc, RpcError,
    RpcErrorCode, RpcOperation, RpcResult, RpcTarget, VlanSet,
};
use tracing::debug;

use crate::codec::{GrantPlan, JsonDocumentCodec};
use crate::error::{read_json, FixtureError, FixtureResult};

/// One recorded answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordedResponse {
    /// Manifest derived from the request by `plan`.
    Grant {
        #[serde(flatten)]
        plan: GrantPlan,
    },
    /// Manifest returned verbatim.
    Manifest { manifest: String },
    Status { state: AllocationState },
    Deleted {
        #[serde(default)]
        failed: Vec<String>,
    },
    Error {
        code: RpcErrorCode,
        #[serde(default)]
        am_code: Option<i32>,
        message: String,
        #[serde(default)]
        failed_hop_urn: Option<String>,
    },
}

impl RecordedResponse {
    /// Echoes the request.
    pub fn grant() -> Self {
        Self::Grant {
            plan: GrantPlan::default(),
        }
    }

    /// Echoes the request but grants `tag` at `hop` (`path/hop` or hop id).
    pub fn grant_tag(hop: &str, tag: VlanSet) -> Self {
        let mut plan = GrantPlan::default();
        plan.suggested.insert(hop.to_string(), tag);
        Self::Grant { plan }
    }

    /// Echoes the request and stamps a circuit id.
    pub fn grant_circuit(global_id: &str) -> Self {
        Self::Grant {
            plan: GrantPlan {
                global_id: Some(global_id.to_string()),
                ..Default::default()
            },
        }
    }

    /// Echoes the request leaving `hop` out of the manifest.
    pub fn grant_omitting(hop: &str) -> Self {
        let mut plan = GrantPlan::default();
        plan.omit_hops.insert(hop.to_string());
        Self::Grant { plan }
    }

    pub fn status(state: AllocationState) -> Self {
        Self::Status { state }
    }

    pub fn deleted() -> Self {
        Self::Deleted { failed: Vec::new() }
    }

    pub fn partial_delete(failed: &[&str]) -> Self {
        Self::Deleted {
            failed: failed.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn error(code: RpcErrorCode, message: &str) -> Self {
        Self::Error {
            code,
            am_code: None,
            message: message.to_string(),
            failed_hop_urn: None,
        }
    }

    pub fn vlan_unavailable(message: &str) -> Self {
        Self::error(RpcErrorCode::VlanUnavailable, message)
    }

    /// VLAN unavailable, blaming one hop.
    pub fn vlan_unavailable_at(hop_urn: &str, message: &str) -> Self {
        Self::Error {
            code: RpcErrorCode::VlanUnavailable,
            am_code: None,
            message: message.to_string(),
            failed_hop_urn: Some(hop_urn.to_string()),
        }
    }

    pub fn busy(message: &str) -> Self {
        Self::error(RpcErrorCode::Busy, message)
    }

    pub fn fatal(message: &str) -> Self {
        Self::error(RpcErrorCode::Fatal, message)
    }

    /// Untyped error carrying only a manager code.
    pub fn am_error(am_code: i32, message: &str) -> Self {
        Self::Error {
            code: RpcErrorCode::Unknown,
            am_code: Some(am_code),
            message: message.to_string(),
            failed_hop_urn: None,
        }
    }

    fn as_error(&self, operation: RpcOperation) -> Option<RpcError> {
        match self {
            Self::Error {
                code,
                am_code,
                message,
                failed_hop_urn,
            } => Some(RpcError {
                operation,
                code: *code,
                am_code: *am_code,
                message: message.clone(),
                failed_hop_urn: failed_hop_urn.clone(),
            }),
            _ => None,
        }
    }
}

/// Responses recorded for one aggregate, as stored in a fixture directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateScript {
    pub urn: String,
    #[serde(default)]
    pub responses: HashMap<RpcOperation, Vec<RecordedResponse>>,
}

/// A call the client received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub urn: String,
    pub operation: RpcOperation,
    pub request: Option<RequestDoc>,
}

#[derive(Debug, Default)]
struct ClientState {
    scripts: HashMap<(String, RpcOperation), VecDeque<RecordedResponse>>,
    last_request: HashMap<String, RequestDoc>,
    calls: Vec<RecordedCall>,
}

/// [`AggregateClient`] answering from scripts instead of the network.
#[derive(Debug, Default)]
pub struct FixtureClient {
    state: Mutex<ClientState>,
}

impl FixtureClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `aggregates/*.json` script under `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> FixtureResult<Self> {
        let dir = dir.as_ref().join("aggregates");
        let client = Self::new();
        if !dir.exists() {
            return Ok(client);
        }

        let entries = std::fs::read_dir(&dir).map_err(|e| FixtureError::io(&dir, e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| FixtureError::io(&dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let script: AggregateScript = read_json(&path)?;
            debug!(urn = %script.urn, file = %path.display(), "Loaded aggregate script");
            for (operation, responses) in script.responses {
                client.push_all(&script.urn, operation, responses);
            }
        }
        Ok(client)
    }

    /// Appends responses for `operation` at `urn`.
    pub fn with_script(
        self,
        urn: &str,
        operation: RpcOperation,
        responses: impl IntoIterator<Item = RecordedResponse>,
    ) -> Self {
        self.push_all(urn, operation, responses);
        self
    }

    pub fn push(&self, urn: &str, operation: RpcOperation, response: RecordedResponse) {
        self.push_all(urn, operation, [response]);
    }

    fn push_all(
        &self,
        urn: &str,
        operation: RpcOperation,
        responses: impl IntoIterator<Item = RecordedResponse>,
    ) {
        self.lock()
            .scripts
            .entry((urn.to_string(), operation))
            .or_default()
            .extend(responses);
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Operations called at `urn`, in order.
    pub fn operations(&self, urn: &str) -> Vec<RpcOperation> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.urn == urn)
            .map(|c| c.operation)
            .collect()
    }

    pub fn count(&self, urn: &str, operation: RpcOperation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.urn == urn && c.operation == operation)
            .count()
    }

    /// Requests submitted to `urn`, in order.
    pub fn requests(&self, urn: &str) -> Vec<RequestDoc> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.urn == urn)
            .filter_map(|c| c.request.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the call and takes the next scripted response, if any.
    fn next(
        &self,
        target: &RpcTarget,
        operation: RpcOperation,
        request: Option<&RequestDoc>,
    ) -> Option<RecordedResponse> {
        let mut state = self.lock();
        state.calls.push(RecordedCall {
            urn: target.urn.clone(),
            operation,
            request: request.cloned(),
        });
        if let Some(request) = request {
            state
                .last_request
                .insert(target.urn.clone(), request.clone());
        }

        let queue = state.scripts.get_mut(&(target.urn.clone(), operation))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn last_request(&self, target: &RpcTarget, operation: RpcOperation) -> RpcResult<RequestDoc> {
        self.lock()
            .last_request
            .get(&target.urn)
            .cloned()
            .ok_or_else(|| RpcError::fatal(operation, "no reservation request on record"))
    }

    fn manifest_response(
        &self,
        operation: RpcOperation,
        response: Option<RecordedResponse>,
        request: &RequestDoc,
    ) -> RpcResult<ManifestDoc> {
        match response.unwrap_or_else(RecordedResponse::grant) {
            RecordedResponse::Grant { plan } => JsonDocumentCodec::echo_manifest(request, &plan)
                .map_err(|e| RpcError::fatal(operation, e.to_string())),
            RecordedResponse::Manifest { manifest } => Ok(ManifestDoc(manifest)),
            other => Err(other
                .as_error(operation)
                .unwrap_or_else(|| unexpected(operation, &other))),
        }
    }
}

fn unexpected(operation: RpcOperation, response: &RecordedResponse) -> RpcError {
    RpcError::fatal(
        operation,
        format!("scripted response {:?} does not fit {}", response, operation),
    )
}

#[async_trait]
impl AggregateClient for FixtureClient {
    async fn create(&self, target: &RpcTarget, request: &RequestDoc) -> RpcResult<ManifestDoc> {
        let response = self.next(target, RpcOperation::Create, Some(request));
        self.manifest_response(RpcOperation::Create, response, request)
    }

    async fn allocate(&self, target: &RpcTarget, request: &RequestDoc) -> RpcResult<ManifestDoc> {
        let response = self.next(target, RpcOperation::Allocate, Some(request));
        self.manifest_response(RpcOperation::Allocate, response, request)
    }

    async fn provision(&self, target: &RpcTarget) -> RpcResult<ManifestDoc> {
        let response = self.next(target, RpcOperation::Provision, None);
        let request = self.last_request(target, RpcOperation::Provision)?;
        self.manifest_response(RpcOperation::Provision, response, &request)
    }

    async fn delete(&self, target: &RpcTarget) -> RpcResult<DeleteOutcome> {
        match self.next(target, RpcOperation::Delete, None) {
            None => Ok(DeleteOutcome {
                deleted: vec![target.urn.clone()],
                failed: Vec::new(),
            }),
            Some(RecordedResponse::Deleted { failed }) => Ok(DeleteOutcome {
                deleted: if failed.is_empty() {
                    vec![target.urn.clone()]
                } else {
                    Vec::new()
                },
                failed,
            }),
            Some(other) => Err(other
                .as_error(RpcOperation::Delete)
                .unwrap_or_else(|| unexpected(RpcOperation::Delete, &other))),
        }
    }

    async fn status(&self, target: &RpcTarget) -> RpcResult<AllocationState> {
        match self.next(target, RpcOperation::Status, None) {
            None => Ok(AllocationState::Ready),
            Some(RecordedResponse::Status { state }) => Ok(state),
            Some(other) => Err(other
                .as_error(RpcOperation::Status)
                .unwrap_or_else(|| unexpected(RpcOperation::Status, &other))),
        }
    }

    async fn describe(&self, target: &RpcTarget) -> RpcResult<ManifestDoc> {
        let response = self.next(target, RpcOperation::Describe, None);
        let request = self.last_request(target, RpcOperation::Describe)?;
        self.manifest_response(RpcOperation::Describe, response, &request)
    }
}
