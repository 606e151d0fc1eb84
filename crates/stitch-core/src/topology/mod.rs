//! Circuit topology model: paths, hops, their negotiable VLAN state, and
//! the nodes and links carried alongside them in the request.
//!
//! Entities reference each other through index newtypes into the tables of
//! one [`AttemptContext`](crate::context::AttemptContext). No entity owns
//! another, so restarting from the path computer is a matter of building a
//! fresh table set.

mod elements;
mod hop;
mod path;
mod spec;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use elements::{Link, Node};
pub use hop::{Hop, HopLink};
pub use path::Path;
pub use spec::{AggregateSpec, HopRef, HopSpec, PathSpec, TopologySpec};

macro_rules! index_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub usize);

        impl $name {
            /// Position in the owning table.
            pub fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $prefix, self.0)
            }
        }
    };
}

index_type!(
    /// Non-owning handle to a hop in the attempt's hop table.
    HopIndex,
    "hop"
);
index_type!(
    /// Handle to a path in the attempt's path table.
    PathIndex,
    "path"
);
index_type!(
    /// Handle to an aggregate in the attempt's aggregate table.
    AggregateIndex,
    "agg"
);
