//! Coalesce: category deduplication for knowledge graphs
//!
//! Extraction pipelines tend to produce many `Category` nodes that name the
//! same concept ("AI", "artificial intelligence", "Artificial-Intelligence").
//! Coalesce finds and collapses them in stages that narrow the search space
//! before anything expensive happens:
//!
//! - **Similarity**: embedding KNN links categories above a cosine cutoff
//! - **Communities**: weakly-connected components of that graph
//! - **Clusters**: fuzzy name matching inside each community
//! - **Adjudication**: a semantic resolver decides what really is the same
//! - **Merge**: duplicates collapse into one survivor, relationships rewired
//! - **Sanitize**: self-loops and duplicate relationships are removed
//!
//! # Example
//!
//! ```no_run
//! use coalesce::{DedupConfig, DedupParams, Deduplicator, LlmOrcResolver, OpenStore, SqliteStore};
//! use coalesce::llm_orc::SubprocessClient;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteStore::open("graph.db")?);
//! let resolver = Arc::new(LlmOrcResolver::new(
//!     Arc::new(SubprocessClient::new()),
//!     "entity-resolution",
//! ));
//! let dedup = Deduplicator::new(store, resolver, DedupConfig::default());
//! let summary = dedup.deduplicate(DedupParams::default()).await?;
//! println!("merged {} groups", summary.merged_count);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dedup;
mod graph;
pub mod import;
pub mod llm_orc;
pub mod mcp;
pub mod resolver;
pub mod stats;
pub mod storage;

pub use config::{ConfigError, DedupConfig};
pub use dedup::{
    CancellationToken, DedupError, DedupParams, DedupSummary, Deduplicator, SanitizeReport,
};
pub use graph::{
    CategoryNode, EdgeId, NodeId, Properties, PropertyValue, Relationship, CATEGORY_LABEL,
    MENTIONS,
};
pub use import::{GraphDump, ImportReport};
pub use resolver::{LlmOrcResolver, MergeProposal, ResolverError, SemanticResolver};
pub use stats::GraphStats;
pub use storage::{
    GraphStore, MergePolicy, OpenStore, SqliteStore, StorageError, StorageResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
