//! Storage trait definitions

use crate::graph::{CategoryNode, EdgeId, NodeId, Relationship};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A named resource (e.g. an analysis projection) is already present.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Connection lock poisoned")]
    Poisoned,
}

impl StorageError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Only lock contention on the database is transient; every other
    /// failure would repeat identically.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// How scalar properties are combined when nodes are merged.
///
/// Relationships are always preserved and rewired to the survivor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Survivor's values win on conflict; keys only present on losers are kept.
    #[default]
    Discard,
    /// Losers' populated values replace the survivor's, in creation order.
    Overwrite,
}

/// Relationship shapes removed by the sanitizer passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipPredicate {
    /// Source and target are the same node.
    SelfLoop { rel_type: Option<String> },
    /// Another relationship with the same source, target and type has a lower id.
    ParallelDuplicate { rel_type: Option<String> },
    /// A relationship of the same type runs the opposite way and has a lower id.
    ReciprocalDuplicate { rel_type: Option<String> },
}

impl RelationshipPredicate {
    pub fn rel_type(&self) -> Option<&str> {
        match self {
            RelationshipPredicate::SelfLoop { rel_type }
            | RelationshipPredicate::ParallelDuplicate { rel_type }
            | RelationshipPredicate::ReciprocalDuplicate { rel_type } => rel_type.as_deref(),
        }
    }
}

/// A materialized analysis projection: the working node set of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub name: String,
    pub label: String,
    pub node_count: usize,
}

/// Id and embedding of one projected node.
#[derive(Debug, Clone)]
pub struct ProjectedNode {
    pub id: NodeId,
    pub embedding: Vec<f32>,
}

/// The fields string clustering needs, without embeddings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSummary {
    pub id: NodeId,
    pub name: String,
    pub community: Option<i64>,
}

/// Trait for graph storage backends
///
/// Every mutating operation is transactional: it either commits whole or
/// leaves the graph untouched. Implementations must be thread-safe.
pub trait GraphStore: Send + Sync {
    // === Node Operations ===

    /// Save a category node (insert or update)
    fn save_node(&self, node: &CategoryNode) -> StorageResult<()>;

    /// Save a node under another label (documents and other upstream nodes)
    fn save_labeled_node(&self, label: &str, node: &CategoryNode) -> StorageResult<()>;

    /// Load a node by ID
    fn load_node(&self, id: &NodeId) -> StorageResult<Option<CategoryNode>>;

    /// Id, name and community of every node with the label
    fn node_summaries(&self, label: &str) -> StorageResult<Vec<NodeSummary>>;

    /// Number of nodes with the label
    fn count_nodes(&self, label: &str) -> StorageResult<usize>;

    // === Relationship Operations ===

    /// Insert a relationship, returning its assigned id
    fn save_relationship(&self, relationship: &Relationship) -> StorageResult<EdgeId>;

    /// All relationships, optionally restricted to one type, ordered by id
    fn relationships(&self, rel_type: Option<&str>) -> StorageResult<Vec<Relationship>>;

    /// Number of relationships
    fn count_relationships(&self) -> StorageResult<usize>;

    // === Analysis Projection ===

    /// Materialize every node of `label` that has an embedding under `name`.
    ///
    /// Fails with [`StorageError::AlreadyExists`] if the name is taken.
    fn project_nodes(&self, name: &str, label: &str) -> StorageResult<Projection>;

    /// Drop a projection. Returns false if it did not exist.
    fn drop_projection(&self, name: &str) -> StorageResult<bool>;

    /// One page of projected nodes, in a stable order
    fn projection_page(
        &self,
        name: &str,
        offset: usize,
        limit: usize,
    ) -> StorageResult<Vec<ProjectedNode>>;

    /// Overwrite the community tag of every node with the label.
    ///
    /// Nodes absent from `assignments` are reset to no community.
    fn write_communities(&self, label: &str, assignments: &[(NodeId, i64)])
        -> StorageResult<usize>;

    // === Merging ===

    /// Collapse the nodes into one survivor, rewiring all relationships.
    ///
    /// Returns `None` when fewer than two of the ids still exist.
    fn merge_nodes(&self, ids: &[NodeId], policy: MergePolicy) -> StorageResult<Option<NodeId>>;

    /// Merge several groups in one transaction.
    ///
    /// Returns the number of groups that actually collapsed.
    fn merge_batch(&self, groups: &[Vec<NodeId>], policy: MergePolicy) -> StorageResult<usize>;

    // === Cleanup ===

    /// Delete at most `batch_size` relationships matching the predicate.
    ///
    /// Returns how many were deleted; callers repeat until it returns 0.
    fn delete_relationships_matching(
        &self,
        predicate: &RelationshipPredicate,
        batch_size: usize,
    ) -> StorageResult<usize>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: GraphStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
