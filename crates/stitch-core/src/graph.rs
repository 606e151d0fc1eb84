//! Aggregate dependency graph.
//!
//! An aggregate depends on another when one of its hops imports the tag
//! granted at a hop of the other. Both directions are indexed: readiness
//! needs `depends_on`, teardown needs `is_dependency_for` to cascade.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::topology::AggregateIndex;

/// Dependency edges between the aggregates of one attempt.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// dependent -> aggregates it waits on
    depends_on: BTreeMap<AggregateIndex, BTreeSet<AggregateIndex>>,
    /// Reverse index: dependency -> aggregates waiting on it
    is_dependency_for: BTreeMap<AggregateIndex, BTreeSet<AggregateIndex>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `dependent` waits on `dependency`. Self edges are ignored.
    pub fn add_edge(&mut self, dependent: AggregateIndex, dependency: AggregateIndex) {
        if dependent == dependency {
            return;
        }
        self.depends_on.entry(dependent).or_default().insert(dependency);
        self.is_dependency_for
            .entry(dependency)
            .or_default()
            .insert(dependent);
    }

    /// Aggregates `agg` waits on.
    pub fn depends_on(&self, agg: AggregateIndex) -> impl Iterator<Item = AggregateIndex> + '_ {
        self.depends_on.get(&agg).into_iter().flatten().copied()
    }

    /// Aggregates waiting on `agg`.
    pub fn is_dependency_for(
        &self,
        agg: AggregateIndex,
    ) -> impl Iterator<Item = AggregateIndex> + '_ {
        self.is_dependency_for.get(&agg).into_iter().flatten().copied()
    }

    pub fn has_dependents(&self, agg: AggregateIndex) -> bool {
        self.is_dependency_for
            .get(&agg)
            .is_some_and(|deps| !deps.is_empty())
    }

    /// Every aggregate transitively reachable from `start` through
    /// `is_dependency_for`, in breadth-first visit order, excluding `start`.
    pub fn invalidation_order(&self, start: AggregateIndex) -> Vec<AggregateIndex> {
        let mut visited = BTreeSet::from([start]);
        let mut order = Vec::new();
        let mut worklist = VecDeque::from([start]);

        while let Some(current) = worklist.pop_front() {
            for next in self.is_dependency_for(current) {
                if visited.insert(next) {
                    order.push(next);
                    worklist.push_back(next);
                }
            }
        }

        order
    }

    /// Orders `count` aggregates so dependencies come first.
    ///
    /// Returns an aggregate on a cycle if there is one.
    pub fn topological_order(&self, count: usize) -> Result<Vec<AggregateIndex>, AggregateIndex> {
        let mut pending: BTreeMap<AggregateIndex, usize> = (0..count)
            .map(|i| {
                let agg = AggregateIndex(i);
                (agg, self.depends_on(agg).count())
            })
            .collect();
        let mut ready: VecDeque<AggregateIndex> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(agg, _)| *agg)
            .collect();
        let mut order = Vec::with_capacity(count);

        while let Some(agg) = ready.pop_front() {
            order.push(agg);
            for dependent in self.is_dependency_for(agg) {
                if let Some(n) = pending.get_mut(&dependent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }

        if order.len() == count {
            return Ok(order);
        }
        match pending.into_iter().find(|(_, n)| *n > 0) {
            Some((agg, _)) => Err(agg),
            None => Ok(order),
        }
    }
}
