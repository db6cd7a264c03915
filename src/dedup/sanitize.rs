//! GraphSanitizer: restore relationship invariants after merges
//!
//! Three passes, each repeated in batches until a batch deletes nothing:
//! self-loops, parallel duplicates (same source, target and type), and
//! reciprocal duplicates (the same type in both directions). Every pass
//! keeps the relationship with the lowest id, so the final graph does not
//! depend on the order the passes run in.

use crate::storage::{with_retry, GraphStore, RelationshipPredicate, RetryPolicy, StorageResult};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SanitizeReport {
    pub loops_removed: usize,
    pub duplicates_removed: usize,
    pub reciprocals_removed: usize,
}

impl SanitizeReport {
    pub fn total(&self) -> usize {
        self.loops_removed + self.duplicates_removed + self.reciprocals_removed
    }
}

pub struct GraphSanitizer {
    store: Arc<dyn GraphStore>,
    batch_size: usize,
    rel_type: Option<String>,
    retry: RetryPolicy,
}

impl GraphSanitizer {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            batch_size: 1000,
            rel_type: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Only clean relationships of this type; `None` cleans every type.
    pub fn with_relationship_type(mut self, rel_type: Option<String>) -> Self {
        self.rel_type = rel_type;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn run(&self) -> StorageResult<SanitizeReport> {
        let rel_type = self.rel_type.clone();
        let report = SanitizeReport {
            loops_removed: self
                .drain(RelationshipPredicate::SelfLoop {
                    rel_type: rel_type.clone(),
                })
                .await?,
            duplicates_removed: self
                .drain(RelationshipPredicate::ParallelDuplicate {
                    rel_type: rel_type.clone(),
                })
                .await?,
            reciprocals_removed: self
                .drain(RelationshipPredicate::ReciprocalDuplicate { rel_type })
                .await?,
        };

        info!(
            loops = report.loops_removed,
            duplicates = report.duplicates_removed,
            reciprocals = report.reciprocals_removed,
            "sanitized relationships"
        );
        Ok(report)
    }

    async fn drain(&self, predicate: RelationshipPredicate) -> StorageResult<usize> {
        let store = &self.store;
        let mut total = 0;
        let mut batches = 0;
        loop {
            let deleted = with_retry(self.retry, "delete_relationships", || {
                store.delete_relationships_matching(&predicate, self.batch_size)
            })
            .await?;
            if deleted == 0 {
                break;
            }
            total += deleted;
            batches += 1;
        }
        debug!(pass = ?predicate, batches, removed = total, "sanitizer pass done");
        Ok(total)
    }
}
