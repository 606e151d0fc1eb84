//! Aggregate manager RPC boundary.
//!
//! The engine talks to aggregates only through [`AggregateClient`]. The wire
//! transport, credentials and TLS live behind that trait.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::{ManifestDoc, RequestDoc};

/// Protocol generation spoken by an aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    /// Single-phase `create`, teardown via `deletesliver`.
    #[default]
    V2,
    /// Two-phase `allocate` then `provision`, teardown via `delete`.
    V3,
}

impl ApiVersion {
    /// Returns true if reservations need a separate provision step.
    pub fn is_two_phase(&self) -> bool {
        matches!(self, ApiVersion::V3)
    }
}

/// Addressing for one RPC call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcTarget {
    pub urn: String,
    pub url: String,
    pub version: ApiVersion,
    /// Slice the reservation belongs to.
    pub slice: String,
}

/// Logical operation an RPC performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcOperation {
    Create,
    Allocate,
    Provision,
    Delete,
    Status,
    Describe,
}

impl RpcOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcOperation::Create => "create",
            RpcOperation::Allocate => "allocate",
            RpcOperation::Provision => "provision",
            RpcOperation::Delete => "delete",
            RpcOperation::Status => "status",
            RpcOperation::Describe => "describe",
        }
    }
}

impl fmt::Display for RpcOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-checkable failure code reported by the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcErrorCode {
    VlanUnavailable,
    Busy,
    Fatal,
    #[default]
    Unknown,
}

/// Typed failure of one RPC call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed ({code:?}, am_code {am_code:?}): {message}")]
pub struct RpcError {
    pub operation: RpcOperation,
    pub code: RpcErrorCode,
    /// Numeric code from the aggregate manager, if it sent one.
    pub am_code: Option<i32>,
    pub message: String,
    /// URN of the hop the aggregate blamed, if it named one.
    pub failed_hop_urn: Option<String>,
}

impl RpcError {
    pub fn new(operation: RpcOperation, code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            operation,
            code,
            am_code: None,
            message: message.into(),
            failed_hop_urn: None,
        }
    }

    /// A busy error, used for call timeouts.
    pub fn busy(operation: RpcOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RpcErrorCode::Busy, message)
    }

    pub fn vlan_unavailable(operation: RpcOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RpcErrorCode::VlanUnavailable, message)
    }

    pub fn fatal(operation: RpcOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RpcErrorCode::Fatal, message)
    }

    pub fn with_am_code(mut self, am_code: i32) -> Self {
        self.am_code = Some(am_code);
        self
    }

    pub fn with_failed_hop(mut self, urn: impl Into<String>) -> Self {
        self.failed_hop_urn = Some(urn.into());
        self
    }
}

/// Result of an RPC call.
pub type RpcResult<T> = Result<T, RpcError>;

/// Allocation state reported by a status call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AllocationState {
    Ready,
    NotReady,
    Configuring,
    Allocated,
    Provisioned,
    Failed,
    Unknown(String),
}

impl AllocationState {
    /// Terminal success.
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            AllocationState::Ready | AllocationState::Allocated | AllocationState::Provisioned
        )
    }

    /// Terminal failure.
    pub fn is_failed(&self) -> bool {
        matches!(self, AllocationState::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        self.is_ready() || self.is_failed()
    }

    pub fn as_str(&self) -> &str {
        match self {
            AllocationState::Ready => "geni_ready",
            AllocationState::NotReady => "geni_notready",
            AllocationState::Configuring => "geni_configuring",
            AllocationState::Allocated => "geni_allocated",
            AllocationState::Provisioned => "geni_provisioned",
            AllocationState::Failed => "geni_failed",
            AllocationState::Unknown(s) => s,
        }
    }
}

impl From<String> for AllocationState {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "geni_ready" | "ready" => AllocationState::Ready,
            "geni_notready" | "notready" => AllocationState::NotReady,
            "geni_configuring" | "configuring" => AllocationState::Configuring,
            "geni_allocated" | "allocated" => AllocationState::Allocated,
            "geni_provisioned" | "provisioned" => AllocationState::Provisioned,
            "geni_failed" | "failed" => AllocationState::Failed,
            _ => AllocationState::Unknown(value),
        }
    }
}

impl From<AllocationState> for String {
    fn from(value: AllocationState) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AllocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a delete call, listing slivers that could not be torn down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

impl DeleteOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Client for one family of aggregate manager calls.
///
/// `create` is the v2 single-phase reservation; `allocate` and `provision`
/// are the v3 two-phase pair. `delete` covers both `deletesliver` and
/// `delete` via [`RpcTarget::version`].
#[async_trait]
pub trait AggregateClient: Send + Sync {
    async fn create(&self, target: &RpcTarget, request: &RequestDoc) -> RpcResult<ManifestDoc>;

    async fn allocate(&self, target: &RpcTarget, request: &RequestDoc) -> RpcResult<ManifestDoc>;

    async fn provision(&self, target: &RpcTarget) -> RpcResult<ManifestDoc>;

    async fn delete(&self, target: &RpcTarget) -> RpcResult<DeleteOutcome>;

    async fn status(&self, target: &RpcTarget) -> RpcResult<AllocationState>;

    async fn describe(&self, target: &RpcTarget) -> RpcResult<ManifestDoc>;
}
