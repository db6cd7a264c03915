//! ConnectivityGrouper: weakly-connected components over similarity edges

use super::similarity::SimilarityGraph;
use crate::graph::NodeId;
use std::collections::{HashMap, HashSet};

/// Community assignment for every node of a similarity graph.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub assignments: Vec<(NodeId, i64)>,
    pub communities: usize,
}

impl Partition {
    /// Node ids grouped by community id.
    pub fn members(&self) -> HashMap<i64, Vec<NodeId>> {
        let mut groups: HashMap<i64, Vec<NodeId>> = HashMap::new();
        for (id, community) in &self.assignments {
            groups.entry(*community).or_default().push(id.clone());
        }
        groups
    }
}

/// Labels connected components; nodes without edges get a community of their own.
#[derive(Debug, Default)]
pub struct ConnectivityGrouper;

impl ConnectivityGrouper {
    pub fn new() -> Self {
        Self
    }

    pub fn group(&self, graph: &SimilarityGraph) -> Partition {
        let mut adj: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
        for node in &graph.nodes {
            adj.entry(node).or_default();
        }
        for edge in &graph.edges {
            adj.entry(&edge.source).or_default().push(&edge.target);
            adj.entry(&edge.target).or_default().push(&edge.source);
        }

        let mut visited: HashSet<&NodeId> = HashSet::new();
        let mut partition = Partition::default();
        let mut next_id: i64 = 0;

        for start in &graph.nodes {
            if visited.contains(start) {
                continue;
            }

            let mut stack: Vec<&NodeId> = vec![start];
            while let Some(current) = stack.pop() {
                if !visited.insert(current) {
                    continue;
                }
                partition.assignments.push((current.clone(), next_id));
                if let Some(neighbors) = adj.get(current) {
                    stack.extend(neighbors.iter().filter(|n| !visited.contains(*n)));
                }
            }

            next_id += 1;
        }

        partition.communities = next_id as usize;
        partition
    }
}
