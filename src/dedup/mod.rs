//! Category deduplication pipeline
//!
//! Stages, each consuming the previous stage's output whole:
//!
//! 1. [`projector`]: materialize the candidate set (categories with embeddings)
//! 2. [`similarity`]: KNN over embeddings, keep pairs at or above the cutoff
//! 3. [`community`]: weakly-connected components, persisted as `community`
//! 4. [`cluster`]: fuzzy name matching inside each community
//! 5. [`adjudicator`]: ask the semantic resolver how each cluster partitions
//! 6. [`merge`]: resolve proposals to node ids and collapse them in batches
//! 7. [`sanitize`]: remove self-loops, parallel and reciprocal duplicates
//!
//! Only the last two stages (and the community tags) write to the store.

pub mod adjudicator;
pub mod cancel;
pub mod cluster;
pub mod community;
pub mod fuzzy;
pub mod merge;
pub mod pipeline;
pub mod projector;
pub mod sanitize;
pub mod similarity;

pub use adjudicator::{Adjudication, Adjudicator};
pub use cancel::CancellationToken;
pub use cluster::{DuplicateCluster, StringClusterer};
pub use community::{ConnectivityGrouper, Partition};
pub use merge::{normalize_for_merge, MergeExecutor, MergeReport};
pub use pipeline::{DedupParams, DedupSummary, Deduplicator};
pub use projector::{CandidateProjector, ProjectionGuard};
pub use sanitize::{GraphSanitizer, SanitizeReport};
pub use similarity::{
    cosine_similarity, InMemoryVectorIndex, SimilarityEdge, SimilarityGraph, SimilarityGrapher,
    VectorIndex,
};

use crate::config::ConfigError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors that end a pipeline run.
///
/// Failures confined to one cluster or one merge batch never surface here;
/// they are logged and counted in the run summary instead.
#[derive(Debug, Error)]
pub enum DedupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Run cancelled before any changes were made")]
    Cancelled,
}
