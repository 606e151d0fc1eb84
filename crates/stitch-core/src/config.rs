//! Engine configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file is a
//! valid configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Bounds and pauses for negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StitchConfig {
    /// Reservation submissions per aggregate before it is excluded.
    #[serde(default = "default_max_allocate_tries")]
    pub max_allocate_tries: u32,

    /// Local tag re-picks per aggregate.
    #[serde(default = "default_max_agg_new_vlan_tries")]
    pub max_agg_new_vlan_tries: u32,

    /// Local tag re-picks per DCN aggregate.
    #[serde(default = "default_max_dcn_agg_new_vlan_tries")]
    pub max_dcn_agg_new_vlan_tries: u32,

    /// Pause after deleting a reservation before resubmitting.
    #[serde(default = "default_pause_for_am_to_free_resources")]
    pub pause_for_am_to_free_resources_secs: u64,

    /// Same, for DCN aggregates.
    #[serde(default = "default_pause_for_dcn_am_to_free_resources")]
    pub pause_for_dcn_am_to_free_resources_secs: u64,

    /// Pause between retries of a busy call.
    #[serde(default = "default_busy_poll_interval")]
    pub busy_poll_interval_secs: u64,

    /// Retries of a busy call before giving up.
    #[serde(default = "default_busy_max_tries")]
    pub busy_max_tries: u32,

    /// Pause between DCN status polls.
    #[serde(default = "default_dcn_poll_interval")]
    pub dcn_poll_interval_secs: u64,

    /// DCN status polls before treating the reservation as failed.
    #[serde(default = "default_dcn_poll_max_tries")]
    pub dcn_poll_max_tries: u32,

    /// Bound on a single RPC round trip.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// Reservation submissions across all aggregates in one attempt.
    #[serde(default = "default_max_allocations_per_attempt")]
    pub max_allocations_per_attempt: u32,

    /// Path computations per stitch.
    #[serde(default = "default_max_scs_calls")]
    pub max_scs_calls: u32,

    /// Seed for tag picks; random when unset.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

fn default_max_allocate_tries() -> u32 {
    60
}

fn default_max_agg_new_vlan_tries() -> u32 {
    50
}

fn default_max_dcn_agg_new_vlan_tries() -> u32 {
    3
}

fn default_pause_for_am_to_free_resources() -> u64 {
    15
}

fn default_pause_for_dcn_am_to_free_resources() -> u64 {
    30
}

fn default_busy_poll_interval() -> u64 {
    10
}

fn default_busy_max_tries() -> u32 {
    10
}

fn default_dcn_poll_interval() -> u64 {
    30
}

fn default_dcn_poll_max_tries() -> u32 {
    10
}

fn default_rpc_timeout() -> u64 {
    300
}

fn default_max_allocations_per_attempt() -> u32 {
    1000
}

fn default_max_scs_calls() -> u32 {
    5
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            max_allocate_tries: default_max_allocate_tries(),
            max_agg_new_vlan_tries: default_max_agg_new_vlan_tries(),
            max_dcn_agg_new_vlan_tries: default_max_dcn_agg_new_vlan_tries(),
            pause_for_am_to_free_resources_secs: default_pause_for_am_to_free_resources(),
            pause_for_dcn_am_to_free_resources_secs: default_pause_for_dcn_am_to_free_resources(),
            busy_poll_interval_secs: default_busy_poll_interval(),
            busy_max_tries: default_busy_max_tries(),
            dcn_poll_interval_secs: default_dcn_poll_interval(),
            dcn_poll_max_tries: default_dcn_poll_max_tries(),
            rpc_timeout_secs: default_rpc_timeout(),
            max_allocations_per_attempt: default_max_allocations_per_attempt(),
            max_scs_calls: default_max_scs_calls(),
            rng_seed: None,
        }
    }
}

impl StitchConfig {
    /// Defaults with every pause set to zero, for replaying recorded sessions.
    pub fn immediate() -> Self {
        Self {
            pause_for_am_to_free_resources_secs: 0,
            pause_for_dcn_am_to_free_resources_secs: 0,
            busy_poll_interval_secs: 0,
            dcn_poll_interval_secs: 0,
            ..Self::default()
        }
    }

    /// Parses a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn pause_for_am_to_free_resources(&self) -> Duration {
        Duration::from_secs(self.pause_for_am_to_free_resources_secs)
    }

    pub fn pause_for_dcn_am_to_free_resources(&self) -> Duration {
        Duration::from_secs(self.pause_for_dcn_am_to_free_resources_secs)
    }

    pub fn busy_poll_interval(&self) -> Duration {
        Duration::from_secs(self.busy_poll_interval_secs)
    }

    pub fn dcn_poll_interval(&self) -> Duration {
        Duration::from_secs(self.dcn_poll_interval_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Rejects zero bounds. Pauses may be zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounds = [
            ("max_allocate_tries", u64::from(self.max_allocate_tries)),
            ("max_agg_new_vlan_tries", u64::from(self.max_agg_new_vlan_tries)),
            ("max_dcn_agg_new_vlan_tries", u64::from(self.max_dcn_agg_new_vlan_tries)),
            ("busy_max_tries", u64::from(self.busy_max_tries)),
            ("dcn_poll_max_tries", u64::from(self.dcn_poll_max_tries)),
            ("rpc_timeout_secs", self.rpc_timeout_secs),
            ("max_allocations_per_attempt", u64::from(self.max_allocations_per_attempt)),
            ("max_scs_calls", u64::from(self.max_scs_calls)),
        ];
        for (field, value) in bounds {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be > 0"));
            }
        }
        Ok(())
    }
}
