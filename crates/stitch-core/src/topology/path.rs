//! Circuit path.

use serde::{Deserialize, Serialize};

use super::HopIndex;

/// An ordered run of hops sharing one circuit segment id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Path {
    /// Segment identifier from the topology.
    pub id: String,
    /// Circuit id assigned by the first aggregate manifest that names one.
    pub global_id: Option<String>,
    /// Hops in path order.
    pub hops: Vec<HopIndex>,
}

impl Path {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            global_id: None,
            hops: Vec::new(),
        }
    }

    /// Records the circuit id unless one was already assigned.
    ///
    /// Returns true if the id was newly set.
    pub fn assign_global_id(&mut self, global_id: &str) -> bool {
        if self.global_id.is_some() || global_id.is_empty() {
            return false;
        }
        self.global_id = Some(global_id.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_id_assigned_once() {
        let mut path = Path::new("p1");
        assert!(!path.assign_global_id(""));
        assert!(path.assign_global_id("circuit-1"));
        assert!(!path.assign_global_id("circuit-2"));
        assert_eq!(path.global_id.as_deref(), Some("circuit-1"));
    }
}
