//! Aggregates and the per-family strategies that drive them.

mod flavor;
mod types;

pub use flavor::{classify_am_code, strategy_for, ErrorPattern, FailureClass, FlavorStrategy};
pub use types::{authority_synonym, Aggregate, AggregateKind};
