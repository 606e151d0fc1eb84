//! Errors loading recorded fixtures.

use std::io;
use std::path::PathBuf;

use stitch_core::ConfigError;
use thiserror::Error;

/// Result type alias for fixture loading.
pub type FixtureResult<T> = Result<T, FixtureError>;

/// Errors reading a fixture directory.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No topology found in {0}")]
    MissingTopology(PathBuf),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl FixtureError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }
}

/// Reads and parses one JSON file.
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> FixtureResult<T> {
    let content = std::fs::read_to_string(path).map_err(|e| FixtureError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| FixtureError::parse(path, e))
}
