//! Error types for building an attempt and loading configuration.
//!
//! Negotiation outcomes are not errors in this sense; they are
//! [`StitchSignal`](crate::signal::StitchSignal)s.

use std::io;
use thiserror::Error;

use crate::topology::HopRef;

/// Errors resolving a computed topology into an attempt.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Duplicate aggregate '{urn}'")]
    DuplicateAggregate { urn: String },

    #[error("Hop {hop} refers to unknown aggregate '{urn}'")]
    UnknownAggregate { hop: HopRef, urn: String },

    #[error("Duplicate hop {hop}")]
    DuplicateHop { hop: HopRef },

    #[error("Hop {hop} refers to unknown hop {target}")]
    UnknownHop { hop: HopRef, target: HopRef },

    #[error("Hop {hop} cannot import VLANs from itself")]
    SelfImport { hop: HopRef },

    /// Aggregate dependencies form a cycle through the named aggregate.
    #[error("Dependency cycle through aggregate '{urn}'")]
    DependencyCycle { urn: String },
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}
