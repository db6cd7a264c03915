//! StringClusterer: candidate duplicates by fuzzy name matching
//!
//! Runs inside each embedding community independently. Pairs of names
//! scoring at or above the threshold are unioned, so chains of similar
//! names collapse into one cluster even when the ends score low.
//!
//! The default threshold assumes only names already close in embedding
//! space are compared. Without the community prefilter it matches almost
//! every pair.

use super::fuzzy::wratio;
use crate::graph::NodeId;
use crate::storage::NodeSummary;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// A set of nodes whose names look like the same concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateCluster {
    pub node_ids: Vec<NodeId>,
    /// Distinct normalized names, in first-seen order
    pub names: Vec<String>,
}

/// Trim and case-fold a name for scoring.
pub fn normalize_for_clustering(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Disjoint-set forest over indices.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

pub struct StringClusterer {
    /// Minimum [`wratio`] score, on the 0-100 scale
    threshold: f64,
}

impl StringClusterer {
    /// `word_similarity` is a fraction; the score cutoff is `word_similarity * 100`.
    pub fn new(word_similarity: f64) -> Self {
        Self {
            threshold: word_similarity * 100.0,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Cluster every community of the given nodes.
    ///
    /// Nodes without a community and communities of one node are skipped.
    pub fn cluster(&self, nodes: &[NodeSummary]) -> Vec<DuplicateCluster> {
        let mut communities: BTreeMap<i64, Vec<&NodeSummary>> = BTreeMap::new();
        for node in nodes {
            if let Some(community) = node.community {
                communities.entry(community).or_default().push(node);
            }
        }

        let mut clusters = Vec::new();
        for (community, members) in communities {
            if members.len() < 2 {
                continue;
            }
            let found = self.cluster_community(&members);
            if !found.is_empty() {
                debug!(community, members = members.len(), clusters = found.len(), "clustered community");
            }
            clusters.extend(found);
        }
        clusters
    }

    fn cluster_community(&self, members: &[&NodeSummary]) -> Vec<DuplicateCluster> {
        // Distinct names, each with every node carrying it
        let mut names: Vec<String> = Vec::new();
        let mut ids_by_name: HashMap<String, Vec<usize>> = HashMap::new();
        let mut entries: Vec<(&NodeId, usize)> = Vec::new();

        for member in members {
            let name = normalize_for_clustering(&member.name);
            if name.is_empty() {
                continue;
            }
            let name_idx = match names.iter().position(|n| *n == name) {
                Some(idx) => idx,
                None => {
                    names.push(name.clone());
                    names.len() - 1
                }
            };
            ids_by_name.entry(name).or_default().push(entries.len());
            entries.push((&member.id, name_idx));
        }
        if entries.len() < 2 {
            return Vec::new();
        }

        let mut sets = UnionFind::new(entries.len());
        for same_name in ids_by_name.values() {
            for pair in same_name.windows(2) {
                sets.union(pair[0], pair[1]);
            }
        }
        for i in 0..names.len() {
            for j in (i + 1)..names.len() {
                if wratio(&names[i], &names[j]) >= self.threshold {
                    let a = ids_by_name[&names[i]][0];
                    let b = ids_by_name[&names[j]][0];
                    sets.union(a, b);
                }
            }
        }

        let mut components: BTreeMap<usize, DuplicateCluster> = BTreeMap::new();
        for (idx, (id, name_idx)) in entries.iter().enumerate() {
            let root = sets.find(idx);
            let cluster = components.entry(root).or_insert_with(|| DuplicateCluster {
                node_ids: Vec::new(),
                names: Vec::new(),
            });
            if !cluster.node_ids.contains(id) {
                cluster.node_ids.push((*id).clone());
            }
            let name = &names[*name_idx];
            if !cluster.names.contains(name) {
                cluster.names.push(name.clone());
            }
        }

        components
            .into_values()
            .filter(|c| c.node_ids.len() >= 2)
            .collect()
    }
}
