//! Persistent storage for the category graph
//!
//! The default backend is SQLite; any store implementing [`GraphStore`]
//! can back the deduplication pipeline.

mod retry;
mod sqlite;
mod sqlite_vec;
mod traits;

pub use retry::{with_retry, RetryPolicy};
#[cfg(test)]
pub(crate) use retry::busy_error;
pub use sqlite::SqliteStore;
#[cfg(feature = "vector-index")]
pub use sqlite_vec::SqliteVecIndex;
pub use traits::{
    GraphStore, MergePolicy, NodeSummary, OpenStore, ProjectedNode, Projection,
    RelationshipPredicate, StorageError, StorageResult,
};
