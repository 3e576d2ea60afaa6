//! Invalidation events and the stage dependency graph.
//!
//! The pipeline is a fixed DAG of stages. A parameter change publishes an
//! event; the controller walks the graph once and marks every transitive
//! dependent invalid. Nothing is recomputed during propagation — stages
//! regenerate lazily on the next read.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

/// Events a parameter mutation can publish into the graph.
///
/// `Invalidated` is the generic "recompute me before next read" signal;
/// `Seed` and `SeaLevel` additionally carry the new parameter value for
/// the stages that cache it locally.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Event {
    Invalidated,
    Seed(u64),
    SeaLevel(u8),
}

/// A directed dependency graph with edges fixed at construction.
///
/// An edge A -> B means B reads A's artifact, so invalidating A
/// invalidates B. Traversal visits every node at most once, which makes
/// diamond fan-out collapse to a single invalidation per node.
#[derive(Debug, Default)]
pub struct DependencyGraph<N> {
    downstream: HashMap<N, Vec<N>>,
}

impl<N: Copy + Eq + Hash> DependencyGraph<N> {
    pub fn new() -> Self {
        Self {
            downstream: HashMap::new(),
        }
    }

    /// Record that `to` depends on (reads the artifact of) `from`.
    pub fn add_edge(&mut self, from: N, to: N) {
        let edges = self.downstream.entry(from).or_default();
        if !edges.contains(&to) {
            edges.push(to);
        }
    }

    /// Direct dependents of a node.
    pub fn dependents_of(&self, node: N) -> &[N] {
        self.downstream.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The complete set of nodes invalidated by changes at `sources`,
    /// including the sources themselves. Breadth-first with a shared
    /// visited set; each node appears exactly once regardless of fan-out.
    pub fn invalidation_closure(&self, sources: &[N]) -> Vec<N> {
        let mut visited: HashSet<N> = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<N> = VecDeque::new();

        for &source in sources {
            if visited.insert(source) {
                order.push(source);
                queue.push_back(source);
            }
        }
        while let Some(node) = queue.pop_front() {
            for &next in self.dependents_of(node) {
                if visited.insert(next) {
                    order.push(next);
                    queue.push_back(next);
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_closure_in_order() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");

        let closure = graph.invalidation_closure(&["a"]);
        assert_eq!(closure, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diamond_visits_once() {
        // a -> b, a -> c, b -> d, c -> d: d must appear exactly once.
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("a", "c");
        graph.add_edge("b", "d");
        graph.add_edge("c", "d");

        let closure = graph.invalidation_closure(&["a"]);
        assert_eq!(closure.iter().filter(|&&n| n == "d").count(), 1);
        assert_eq!(closure.len(), 4);
    }

    #[test]
    fn test_multiple_sources_share_visited_set() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "c");
        graph.add_edge("b", "c");

        let closure = graph.invalidation_closure(&["a", "b"]);
        assert_eq!(closure.len(), 3);
    }

    #[test]
    fn test_closure_ignores_upstream() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");

        let closure = graph.invalidation_closure(&["b"]);
        assert_eq!(closure, vec!["b", "c"]);
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("a", "b");
        assert_eq!(graph.dependents_of("a"), &["b"]);
    }
}
