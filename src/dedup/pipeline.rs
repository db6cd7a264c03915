//! Deduplicator: the pipeline entry points
//!
//! `deduplicate` runs every stage in order and always reports a summary;
//! failures confined to a cluster or a merge batch only show up as counts.
//! `sanitize` runs the relationship cleanup on its own.

use super::adjudicator::Adjudicator;
use super::cancel::CancellationToken;
use super::cluster::StringClusterer;
use super::community::ConnectivityGrouper;
use super::merge::{MergeExecutor, NameIndex};
use super::projector::CandidateProjector;
use super::sanitize::{GraphSanitizer, SanitizeReport};
use super::similarity::{
    infer_dimensions, InMemoryVectorIndex, SimilarityGraph, SimilarityGrapher, VectorIndex,
    PAGE_SIZE,
};
use super::DedupError;
use crate::config::{check_threshold, DedupConfig};
use crate::graph::CATEGORY_LABEL;
use crate::resolver::SemanticResolver;
use crate::storage::{with_retry, GraphStore, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Per-call overrides of the configured thresholds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupParams {
    pub similarity_cutoff: Option<f64>,
    pub word_similarity: Option<f64>,
}

impl DedupParams {
    pub fn new(similarity_cutoff: f64, word_similarity: f64) -> Self {
        Self {
            similarity_cutoff: Some(similarity_cutoff),
            word_similarity: Some(word_similarity),
        }
    }
}

/// What one `deduplicate` run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupSummary {
    pub candidates: usize,
    pub similarity_edges: usize,
    pub communities: usize,
    pub clusters: usize,
    pub clusters_failed: usize,
    pub clusters_skipped: usize,
    pub proposals: usize,
    /// Merge groups collapsed into a survivor
    pub merged_count: usize,
    pub groups_skipped: usize,
    pub batches_failed: usize,
    pub sanitize: SanitizeReport,
    pub sanitize_failed: bool,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

pub struct Deduplicator {
    store: Arc<dyn GraphStore>,
    resolver: Arc<dyn SemanticResolver>,
    config: DedupConfig,
    retry: RetryPolicy,
}

impl Deduplicator {
    pub fn new(
        store: Arc<dyn GraphStore>,
        resolver: Arc<dyn SemanticResolver>,
        config: DedupConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            config,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub async fn deduplicate(&self, params: DedupParams) -> Result<DedupSummary, DedupError> {
        self.deduplicate_with_cancel(params, &CancellationToken::new())
            .await
    }

    /// Run the whole pipeline, stopping early if `cancel` fires.
    ///
    /// Cancellation during the similarity stage returns
    /// [`DedupError::Cancelled`] with the graph untouched. Later, the run
    /// returns a summary marked `cancelled`; merges only happen then if
    /// `merge_on_cancel` is set.
    pub async fn deduplicate_with_cancel(
        &self,
        params: DedupParams,
        cancel: &CancellationToken,
    ) -> Result<DedupSummary, DedupError> {
        let started = Instant::now();
        self.config.validate()?;
        let cutoff = params
            .similarity_cutoff
            .unwrap_or(self.config.similarity_cutoff);
        let word_similarity = params
            .word_similarity
            .unwrap_or(self.config.word_similarity);
        check_threshold("similarity_cutoff", cutoff)?;
        check_threshold("word_similarity", word_similarity)?;

        let cancel = match self.config.deadline() {
            Some(deadline) => cancel.with_deadline(deadline),
            None => cancel.clone(),
        };
        info!(cutoff, word_similarity, "starting deduplication");

        let mut summary = DedupSummary::default();
        let store = &self.store;

        // Stages 1-3: candidates, similarity edges, communities
        let guard = CandidateProjector::new(
            Arc::clone(store),
            self.config.projection_name.as_str(),
            CATEGORY_LABEL,
        )
        .with_retry_policy(self.retry)
        .project()
        .await?;
        summary.candidates = guard.node_count();

        let dimensions = match self.config.embedding_dimensions {
            Some(d) => Some(d),
            None => infer_dimensions(store.as_ref(), guard.name(), PAGE_SIZE)?,
        };
        let graph = match dimensions {
            Some(dimensions) => {
                let index = self.open_index(dimensions)?;
                let built = SimilarityGrapher::new(cutoff, self.config.top_k).build(
                    store.as_ref(),
                    guard.name(),
                    dimensions,
                    index.as_ref(),
                    &cancel,
                );
                // The index only lives for this run
                if let Err(e) = index.clear() {
                    warn!(error = %e, "failed to clear vector index");
                }
                built?
            }
            None => SimilarityGraph::default(),
        };
        summary.similarity_edges = graph.edges.len();

        let partition = ConnectivityGrouper::new().group(&graph);
        summary.communities = partition.communities;
        with_retry(self.retry, "write_communities", || {
            store.write_communities(CATEGORY_LABEL, &partition.assignments)
        })
        .await?;
        if let Err(e) = guard.release() {
            warn!(error = %e, "failed to drop projection");
        }

        // Stage 4: string clusters inside each community
        let nodes = store.node_summaries(CATEGORY_LABEL)?;
        let clusters = StringClusterer::new(word_similarity).cluster(&nodes);
        summary.clusters = clusters.len();
        info!(clusters = clusters.len(), "found candidate duplicate clusters");

        // Stage 5: adjudication
        let adjudication = Adjudicator::new(Arc::clone(&self.resolver))
            .with_concurrency(self.config.adjudication_concurrency)
            .with_timeout(self.config.adjudication_timeout())
            .adjudicate(clusters, &cancel)
            .await;
        summary.clusters_failed = adjudication.clusters_failed;
        summary.clusters_skipped = adjudication.clusters_skipped;
        summary.proposals = adjudication.proposals.len();
        summary.cancelled = adjudication.cancelled;

        if summary.cancelled && !self.config.merge_on_cancel {
            warn!(
                skipped = summary.clusters_skipped,
                "run cancelled, no merges performed"
            );
            summary.elapsed_ms = started.elapsed().as_millis() as u64;
            return Ok(summary);
        }

        // Stages 6-7: merge and clean up
        let index = NameIndex::build(&nodes);
        let report = MergeExecutor::new(Arc::clone(store))
            .with_batch_size(self.config.merge_batch_size)
            .with_policy(self.config.merge_policy)
            .with_retry_policy(self.retry)
            .execute(&index, &adjudication.proposals)
            .await;
        summary.merged_count = report.merged;
        summary.groups_skipped = report.groups_skipped;
        summary.batches_failed = report.batches_failed;

        match self.sanitizer().run().await {
            Ok(report) => summary.sanitize = report,
            Err(e) => {
                error!(error = %e, "sanitizer failed; run `sanitize` again to finish cleanup");
                summary.sanitize_failed = true;
            }
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            merged = summary.merged_count,
            clusters = summary.clusters,
            failed = summary.clusters_failed,
            elapsed_ms = summary.elapsed_ms,
            "deduplication finished"
        );
        Ok(summary)
    }

    /// Remove self-loops, parallel and reciprocal duplicates.
    pub async fn sanitize(&self) -> Result<SanitizeReport, DedupError> {
        self.config.validate()?;
        Ok(self.sanitizer().run().await?)
    }

    fn sanitizer(&self) -> GraphSanitizer {
        GraphSanitizer::new(Arc::clone(&self.store))
            .with_batch_size(self.config.sanitize_batch_size)
            .with_relationship_type(self.config.sanitize_relationship_type.clone())
            .with_retry_policy(self.retry)
    }

    #[cfg_attr(not(feature = "vector-index"), allow(unused_variables))]
    fn open_index(&self, dimensions: usize) -> Result<Box<dyn VectorIndex>, DedupError> {
        match &self.config.vector_index_path {
            #[cfg(feature = "vector-index")]
            Some(path) => Ok(Box::new(crate::storage::SqliteVecIndex::open(
                path, dimensions,
            )?)),
            #[cfg(not(feature = "vector-index"))]
            Some(path) => {
                warn!(
                    path = %path.display(),
                    "built without the vector-index feature, using the in-memory index"
                );
                Ok(Box::new(InMemoryVectorIndex::new()))
            }
            None => Ok(Box::new(InMemoryVectorIndex::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CategoryNode;
    use crate::resolver::{MergeProposal, ResolverError};
    use crate::storage::{OpenStore, SqliteStore};
    use async_trait::async_trait;

    /// Merges every cluster into one group.
    struct MergeAll;

    #[async_trait]
    impl SemanticResolver for MergeAll {
        async fn resolve(&self, names: &[String]) -> Result<MergeProposal, ResolverError> {
            let mut proposal = MergeProposal::new();
            proposal.insert(names[0].clone(), names.to_vec());
            Ok(proposal)
        }
    }

    fn store() -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        for (id, name, embedding) in [
            ("a", "Artificial Intelligence", vec![1.0, 0.0, 0.0]),
            ("b", "artificial intelligence", vec![0.99, 0.01, 0.0]),
            ("c", "Robotics", vec![0.0, 0.0, 1.0]),
        ] {
            store
                .save_node(&CategoryNode::new(name).with_id(id).with_embedding(embedding))
                .unwrap();
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn invalid_threshold_is_fatal() {
        let dedup = Deduplicator::new(store(), Arc::new(MergeAll), DedupConfig::default());
        let err = dedup
            .deduplicate(DedupParams::new(1.2, 0.05))
            .await
            .unwrap_err();
        assert!(matches!(err, DedupError::Config(_)));
    }

    #[tokio::test]
    async fn cancelled_before_start_changes_nothing() {
        let store = store();
        let dedup = Deduplicator::new(store.clone(), Arc::new(MergeAll), DedupConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = dedup
            .deduplicate_with_cancel(DedupParams::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DedupError::Cancelled));
        assert_eq!(store.count_nodes(CATEGORY_LABEL).unwrap(), 3);
        // Projection was dropped on the error path
        assert!(!store.drop_projection("entities").unwrap());
    }

    #[tokio::test]
    async fn empty_graph_is_a_clean_noop() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let dedup = Deduplicator::new(store, Arc::new(MergeAll), DedupConfig::default());
        let summary = dedup.deduplicate(DedupParams::default()).await.unwrap();
        assert_eq!(summary.candidates, 0);
        assert_eq!(summary.merged_count, 0);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn merges_case_variants() {
        let store = store();
        let dedup = Deduplicator::new(store.clone(), Arc::new(MergeAll), DedupConfig::default());
        let summary = dedup.deduplicate(DedupParams::default()).await.unwrap();

        assert_eq!(summary.candidates, 3);
        assert_eq!(summary.communities, 2);
        assert_eq!(summary.clusters, 1);
        assert_eq!(summary.merged_count, 1);
        assert_eq!(store.count_nodes(CATEGORY_LABEL).unwrap(), 2);
    }

    #[tokio::test]
    async fn outlier_width_does_not_stall_the_run() {
        let store = store();
        store
            .save_node(
                &CategoryNode::new("Outlier")
                    .with_id("0-outlier")
                    .with_embedding(vec![1.0, 0.0]),
            )
            .unwrap();
        let dedup = Deduplicator::new(store.clone(), Arc::new(MergeAll), DedupConfig::default());
        let summary = dedup.deduplicate(DedupParams::default()).await.unwrap();

        assert_eq!(summary.candidates, 4);
        assert_eq!(summary.similarity_edges, 1);
        assert_eq!(summary.merged_count, 1);
        assert_eq!(store.count_nodes(CATEGORY_LABEL).unwrap(), 3);
    }

    #[tokio::test]
    async fn identical_embeddings_merge_at_cutoff_one() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let v = vec![0.892_352_9, 0.657_058_8, 0.113_725_5, 0.245_294_1];
        for (id, name) in [("a", "Deep Learning"), ("b", "deep learning")] {
            store
                .save_node(&CategoryNode::new(name).with_id(id).with_embedding(v.clone()))
                .unwrap();
        }
        let dedup = Deduplicator::new(store.clone(), Arc::new(MergeAll), DedupConfig::default());
        let summary = dedup.deduplicate(DedupParams::new(1.0, 0.05)).await.unwrap();

        assert_eq!(summary.similarity_edges, 1);
        assert_eq!(summary.communities, 1);
        assert_eq!(summary.merged_count, 1);
    }

    #[cfg(feature = "vector-index")]
    #[tokio::test]
    async fn on_disk_index_is_emptied_after_the_run() {
        use crate::storage::SqliteVecIndex;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.db");
        let config = DedupConfig {
            vector_index_path: Some(path.clone()),
            ..DedupConfig::default()
        };
        let dedup = Deduplicator::new(store(), Arc::new(MergeAll), config);
        let summary = dedup.deduplicate(DedupParams::default()).await.unwrap();
        assert_eq!(summary.merged_count, 1);

        let index = SqliteVecIndex::open(&path, 3).unwrap();
        assert!(index.knn(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }
}
