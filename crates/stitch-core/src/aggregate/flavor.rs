//! Per-family behaviour of aggregate managers.
//!
//! Managers report the same conditions in different ways. A
//! [`FlavorStrategy`] turns an [`RpcError`] into a [`FailureClass`] using the
//! typed code first, then the family's message patterns, then the numeric
//! manager code.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::AggregateKind;
use crate::config::StitchConfig;
use crate::rpc::{RpcError, RpcErrorCode};

/// How the engine should react to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// The requested tag cannot be had; repairable by picking another.
    VlanUnavailable,
    /// Retry the same call unchanged after a pause.
    Busy,
    /// Never retried at this aggregate.
    Fatal,
    /// Not recognized; escalated without excluding the aggregate.
    Unknown,
}

/// A message pattern and the class it implies.
pub type ErrorPattern = (FailureClass, Regex);

fn compile(patterns: &[(FailureClass, &str)]) -> Vec<ErrorPattern> {
    patterns
        .iter()
        .map(|(class, re)| (*class, Regex::new(re).expect("Invalid regex pattern")))
        .collect()
}

static STANDARD_PATTERNS: Lazy<Vec<ErrorPattern>> = Lazy::new(|| {
    compile(&[
        (FailureClass::VlanUnavailable, r"(?i)could not (reserve|find a free) (a shared )?vlan tag"),
        (FailureClass::VlanUnavailable, r"(?i)error reserving vlan tag"),
        (FailureClass::VlanUnavailable, r"(?i)vlan tag \d+ (is )?(not available|in use)"),
        (FailureClass::Busy, r"(?i)(server|resource) is busy"),
        (FailureClass::Busy, r"(?i)try again later"),
        (FailureClass::Fatal, r"(?i)malformed (request|rspec)"),
        (FailureClass::Fatal, r"(?i)already exists"),
    ])
});

static PG_PATTERNS: Lazy<Vec<ErrorPattern>> = Lazy::new(|| {
    compile(&[
        (FailureClass::VlanUnavailable, r"(?i)vlan (\d+ )?(is )?(not available|unavailable)"),
        (FailureClass::VlanUnavailable, r"(?i)no (free )?vlans? available"),
        (FailureClass::Busy, r"(?i)database is locked"),
        (FailureClass::Fatal, r"(?i)sliver already exists"),
        (FailureClass::Fatal, r"(?i)not enough (nodes|resources)"),
    ])
});

static EG_PATTERNS: Lazy<Vec<ErrorPattern>> = Lazy::new(|| {
    compile(&[
        (FailureClass::VlanUnavailable, r"(?i)unable to reserve vlan"),
        (FailureClass::VlanUnavailable, r"(?i)insufficient numbandwidth resources"),
        (FailureClass::VlanUnavailable, r"(?i)label .* not available"),
        (FailureClass::Fatal, r"(?i)embedding workflow error"),
        (FailureClass::Fatal, r"(?i)duplicate slice urn"),
    ])
});

static DCN_PATTERNS: Lazy<Vec<ErrorPattern>> = Lazy::new(|| {
    compile(&[
        (FailureClass::VlanUnavailable, r"(?i)vlan .*not available"),
        (FailureClass::VlanUnavailable, r"(?i)no vlan available"),
        (FailureClass::VlanUnavailable, r"(?i)available_vlan_tag"),
        (FailureClass::Busy, r"(?i)oscars .*busy"),
        (FailureClass::Fatal, r"(?i)path computation failed"),
    ])
});

/// Classifies a numeric aggregate-manager code.
pub fn classify_am_code(am_code: i32) -> FailureClass {
    match am_code {
        24 => FailureClass::VlanUnavailable,
        8 | 14 => FailureClass::Busy,
        1..=7 | 9 | 12 | 13 | 17 | 25 => FailureClass::Fatal,
        _ => FailureClass::Unknown,
    }
}

/// Family-specific behaviour of an aggregate manager.
pub trait FlavorStrategy: Send + Sync {
    fn kind(&self) -> AggregateKind;

    /// Message patterns checked when the typed code is not conclusive.
    fn patterns(&self) -> &'static [ErrorPattern];

    /// Maps a failed call to the reaction it calls for.
    fn classify(&self, err: &RpcError) -> FailureClass {
        match err.code {
            RpcErrorCode::VlanUnavailable => return FailureClass::VlanUnavailable,
            RpcErrorCode::Busy => return FailureClass::Busy,
            RpcErrorCode::Fatal => return FailureClass::Fatal,
            RpcErrorCode::Unknown => {}
        }
        if let Some((class, _)) = self
            .patterns()
            .iter()
            .find(|(_, re)| re.is_match(&err.message))
        {
            return *class;
        }
        err.am_code.map(classify_am_code).unwrap_or(FailureClass::Unknown)
    }

    /// Picks the hop URN an error blames, out of `hop_urns`.
    ///
    /// Uses the URN the transport extracted if it names one of ours, and
    /// otherwise the first of ours mentioned in the message.
    fn failed_hop_hint<'a>(&self, err: &RpcError, hop_urns: &'a [String]) -> Option<&'a str> {
        if let Some(named) = &err.failed_hop_urn {
            if let Some(urn) = hop_urns.iter().find(|u| *u == named) {
                return Some(urn.as_str());
            }
        }
        hop_urns
            .iter()
            .find(|u| !u.is_empty() && err.message.contains(u.as_str()))
            .map(String::as_str)
    }

    /// Returns true if a nominal success must be confirmed by status polling.
    fn polls_status(&self) -> bool {
        false
    }

    /// Returns true if the family routinely omits hops from manifests.
    fn tolerates_missing_hops(&self) -> bool {
        false
    }

    /// Bound on local tag re-picks.
    fn new_vlan_tries_bound(&self, config: &StitchConfig) -> u32 {
        config.max_agg_new_vlan_tries
    }

    /// Pause after deleting before resubmitting.
    fn resource_release_pause(&self, config: &StitchConfig) -> Duration {
        config.pause_for_am_to_free_resources()
    }
}

#[derive(Debug)]
struct StandardFlavor;

impl FlavorStrategy for StandardFlavor {
    fn kind(&self) -> AggregateKind {
        AggregateKind::Standard
    }

    fn patterns(&self) -> &'static [ErrorPattern] {
        &STANDARD_PATTERNS
    }
}

#[derive(Debug)]
struct PgFlavor;

impl FlavorStrategy for PgFlavor {
    fn kind(&self) -> AggregateKind {
        AggregateKind::Pg
    }

    fn patterns(&self) -> &'static [ErrorPattern] {
        &PG_PATTERNS
    }
}

#[derive(Debug)]
struct EgFlavor;

impl FlavorStrategy for EgFlavor {
    fn kind(&self) -> AggregateKind {
        AggregateKind::Eg
    }

    fn patterns(&self) -> &'static [ErrorPattern] {
        &EG_PATTERNS
    }

    fn tolerates_missing_hops(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct DcnFlavor;

impl FlavorStrategy for DcnFlavor {
    fn kind(&self) -> AggregateKind {
        AggregateKind::Dcn
    }

    fn patterns(&self) -> &'static [ErrorPattern] {
        &DCN_PATTERNS
    }

    fn polls_status(&self) -> bool {
        true
    }

    fn new_vlan_tries_bound(&self, config: &StitchConfig) -> u32 {
        config.max_dcn_agg_new_vlan_tries
    }

    fn resource_release_pause(&self, config: &StitchConfig) -> Duration {
        config.pause_for_dcn_am_to_free_resources()
    }
}

static STANDARD: StandardFlavor = StandardFlavor;
static PG: PgFlavor = PgFlavor;
static EG: EgFlavor = EgFlavor;
static DCN: DcnFlavor = DcnFlavor;

/// Strategy for an aggregate family.
pub fn strategy_for(kind: AggregateKind) -> &'static dyn FlavorStrategy {
    match kind {
        AggregateKind::Standard => &STANDARD,
        AggregateKind::Pg => &PG,
        AggregateKind::Eg => &EG,
        AggregateKind::Dcn => &DCN,
    }
}
