//! Graph statistics for the `stats` command and the `graph_stats` tool

use crate::graph::CATEGORY_LABEL;
use crate::storage::{GraphStore, StorageResult};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub categories: usize,
    /// Categories tagged by the last connectivity run
    pub categorized: usize,
    pub communities: usize,
    pub relationships: usize,
    pub self_loops: usize,
    pub relationships_by_type: BTreeMap<String, usize>,
}

impl GraphStats {
    pub fn collect(store: &dyn GraphStore) -> StorageResult<Self> {
        let nodes = store.node_summaries(CATEGORY_LABEL)?;
        let communities: BTreeSet<i64> = nodes.iter().filter_map(|n| n.community).collect();

        let relationships = store.relationships(None)?;
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        for rel in &relationships {
            *by_type.entry(rel.rel_type.clone()).or_insert(0) += 1;
        }

        Ok(Self {
            categories: nodes.len(),
            categorized: nodes.iter().filter(|n| n.community.is_some()).count(),
            communities: communities.len(),
            relationships: relationships.len(),
            self_loops: relationships.iter().filter(|r| r.is_self_loop()).count(),
            relationships_by_type: by_type,
        })
    }
}
