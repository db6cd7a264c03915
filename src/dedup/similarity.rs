//! SimilarityGrapher: KNN over category embeddings
//!
//! Emits an undirected edge for every pair of projected nodes whose cosine
//! similarity is at or above the cutoff. The edges are transient: they feed
//! the connectivity stage and are never written to the store.

use super::cancel::CancellationToken;
use super::DedupError;
use crate::graph::NodeId;
use crate::storage::{GraphStore, StorageError, StorageResult};
use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// Trait for KNN indexes over node embeddings.
///
/// Implementations range from exact in-memory search (default) to
/// sqlite-vec on disk for candidate sets too large to hold in memory.
pub trait VectorIndex: Send + Sync {
    /// Add one vector to the index.
    fn insert(&self, id: &NodeId, embedding: &[f32]) -> StorageResult<()>;
    /// The `k` nearest vectors by cosine similarity, best first.
    fn knn(&self, query: &[f32], k: usize) -> StorageResult<Vec<(NodeId, f32)>>;
    /// Remove every vector.
    fn clear(&self) -> StorageResult<()>;
}

/// Exact brute-force index. Thread-safe via RwLock.
pub struct InMemoryVectorIndex {
    entries: RwLock<Vec<(NodeId, Vec<f32>)>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn insert(&self, id: &NodeId, embedding: &[f32]) -> StorageResult<()> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        entries.push((id.clone(), embedding.to_vec()));
        Ok(())
    }

    fn knn(&self, query: &[f32], k: usize) -> StorageResult<Vec<(NodeId, f32)>> {
        let entries = self.entries.read().map_err(|_| StorageError::Poisoned)?;
        let mut scored: Vec<(NodeId, f32)> = entries
            .iter()
            .map(|(id, vector)| (id.clone(), cosine_similarity(query, vector)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    fn clear(&self) -> StorageResult<()> {
        self.entries
            .write()
            .map_err(|_| StorageError::Poisoned)?
            .clear();
        Ok(())
    }
}

/// Cosine similarity between two vectors, clamped to `[-1, 1]`.
///
/// Accumulates in f64 so equal vectors score exactly 1. Zero vectors are
/// similar to nothing.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// L2-normalize a vector in place.
pub(crate) fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// An undirected similarity pair, stored with `source < target`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub score: f32,
}

/// Output of the similarity stage.
#[derive(Debug, Clone, Default)]
pub struct SimilarityGraph {
    /// Every node that took part, including those with no edges
    pub nodes: Vec<NodeId>,
    pub edges: Vec<SimilarityEdge>,
    /// Nodes left out because their embedding had the wrong width
    pub skipped: usize,
}

/// The embedding width most projected nodes share, if any node has one.
///
/// Ties go to the wider embedding. Nodes of any other width are skipped
/// later by [`SimilarityGrapher::build`].
pub fn infer_dimensions(
    store: &dyn GraphStore,
    projection: &str,
    page_size: usize,
) -> StorageResult<Option<usize>> {
    let page_size = page_size.max(1);
    let mut widths: BTreeMap<usize, usize> = BTreeMap::new();
    let mut offset = 0;
    loop {
        let page = store.projection_page(projection, offset, page_size)?;
        if page.is_empty() {
            break;
        }
        offset += page.len();
        for node in page.iter().filter(|n| !n.embedding.is_empty()) {
            *widths.entry(node.embedding.len()).or_insert(0) += 1;
        }
    }
    if widths.len() > 1 {
        debug!(?widths, "projection holds mixed embedding widths");
    }
    Ok(widths
        .into_iter()
        .max_by(|(wa, ca), (wb, cb)| ca.cmp(cb).then(wa.cmp(wb)))
        .map(|(width, _)| width))
}

/// Nodes read from the projection per page.
pub const PAGE_SIZE: usize = 512;

/// Slack allowed when comparing a score to the cutoff.
///
/// Covers rounding in f32 scores, including the `1 - d²/2` conversion of
/// the on-disk index.
pub const SCORE_TOLERANCE: f64 = 1e-6;

/// Builds similarity edges from a projection.
pub struct SimilarityGrapher {
    cutoff: f64,
    top_k: usize,
    page_size: usize,
}

impl SimilarityGrapher {
    pub fn new(cutoff: f64, top_k: usize) -> Self {
        Self {
            cutoff,
            top_k,
            page_size: PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Index the projection, then query each node's neighbours.
    ///
    /// Both passes page through the projection so the in-process footprint
    /// stays bounded when `index` lives on disk. Nodes whose embedding is
    /// not `dimensions` wide are skipped with a warning.
    pub fn build(
        &self,
        store: &dyn GraphStore,
        projection: &str,
        dimensions: usize,
        index: &dyn VectorIndex,
        cancel: &CancellationToken,
    ) -> Result<SimilarityGraph, DedupError> {
        index.clear()?;

        let mut graph = SimilarityGraph::default();
        let mut indexed: HashSet<NodeId> = HashSet::new();
        let mut offset = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(DedupError::Cancelled);
            }
            let page = store.projection_page(projection, offset, self.page_size)?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            for node in page {
                if node.embedding.len() != dimensions {
                    warn!(
                        node = %node.id,
                        expected = dimensions,
                        actual = node.embedding.len(),
                        "skipping node with mismatched embedding width"
                    );
                    graph.skipped += 1;
                    continue;
                }
                index.insert(&node.id, &node.embedding)?;
                indexed.insert(node.id.clone());
                graph.nodes.push(node.id);
            }
        }
        debug!(indexed = indexed.len(), skipped = graph.skipped, "built vector index");

        // Keyed by (smaller, larger) so each unordered pair is emitted once
        let mut pairs: BTreeMap<(NodeId, NodeId), f32> = BTreeMap::new();
        let mut offset = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(DedupError::Cancelled);
            }
            let page = store.projection_page(projection, offset, self.page_size)?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            for node in page.into_iter().filter(|n| indexed.contains(&n.id)) {
                // One extra neighbour because the node finds itself
                for (neighbour, score) in index.knn(&node.embedding, self.top_k + 1)? {
                    if neighbour == node.id || f64::from(score) + SCORE_TOLERANCE < self.cutoff {
                        continue;
                    }
                    let key = if node.id < neighbour {
                        (node.id.clone(), neighbour)
                    } else {
                        (neighbour, node.id.clone())
                    };
                    pairs
                        .entry(key)
                        .and_modify(|s| *s = s.max(score))
                        .or_insert(score);
                }
            }
        }

        graph.edges = pairs
            .into_iter()
            .map(|((source, target), score)| SimilarityEdge {
                source,
                target,
                score,
            })
            .collect();

        info!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            cutoff = self.cutoff,
            "computed similarity edges"
        );
        Ok(graph)
    }
}
