//! CandidateProjector: the working node set of one run
//!
//! The projection is a transient store-side table. It is created at the
//! start of a run and dropped when the returned guard goes out of scope,
//! on the error path as much as on success.

use crate::storage::{with_retry, GraphStore, Projection, RetryPolicy, StorageError};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Materializes every category with an embedding under a fixed name.
pub struct CandidateProjector {
    store: Arc<dyn GraphStore>,
    name: String,
    label: String,
    retry: RetryPolicy,
}

impl CandidateProjector {
    pub fn new(store: Arc<dyn GraphStore>, name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            label: label.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create the projection.
    ///
    /// A projection left behind by an interrupted run is dropped and
    /// rebuilt; that conflict is recoverable, every other error is not.
    pub async fn project(&self) -> Result<ProjectionGuard, StorageError> {
        let store = &self.store;
        let attempt = || store.project_nodes(&self.name, &self.label);

        let projection = match with_retry(self.retry, "project_nodes", attempt).await {
            Ok(projection) => projection,
            Err(StorageError::AlreadyExists(what)) => {
                warn!(projection = %self.name, "{} left over from a previous run, rebuilding", what);
                with_retry(self.retry, "drop_projection", || {
                    store.drop_projection(&self.name)
                })
                .await?;
                with_retry(self.retry, "project_nodes", attempt).await?
            }
            Err(e) => return Err(e),
        };

        info!(
            projection = %projection.name,
            candidates = projection.node_count,
            "projected candidate categories"
        );
        Ok(ProjectionGuard {
            store: Arc::clone(&self.store),
            projection,
            released: false,
        })
    }
}

/// Drops the projection when released or dropped.
pub struct ProjectionGuard {
    store: Arc<dyn GraphStore>,
    projection: Projection,
    released: bool,
}

impl ProjectionGuard {
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn name(&self) -> &str {
        &self.projection.name
    }

    pub fn node_count(&self) -> usize {
        self.projection.node_count
    }

    /// Drop the projection now, reporting failure to the caller.
    pub fn release(mut self) -> Result<bool, StorageError> {
        self.released = true;
        self.store.drop_projection(&self.projection.name)
    }
}

impl Drop for ProjectionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.store.drop_projection(&self.projection.name) {
            Ok(_) => debug!(projection = %self.projection.name, "dropped projection"),
            Err(e) => error!(projection = %self.projection.name, error = %e, "failed to drop projection"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CategoryNode, CATEGORY_LABEL};
    use crate::storage::{OpenStore, SqliteStore};

    fn seeded_store() -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save_node(&CategoryNode::new("AI").with_embedding(vec![1.0, 0.0]))
            .unwrap();
        store
            .save_node(&CategoryNode::new("ML").with_embedding(vec![0.0, 1.0]))
            .unwrap();
        store.save_node(&CategoryNode::new("unembedded")).unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn projects_only_embedded_categories() {
        let store = seeded_store();
        let projector = CandidateProjector::new(store.clone(), "entities", CATEGORY_LABEL);
        let guard = projector.project().await.unwrap();
        assert_eq!(guard.node_count(), 2);
        assert_eq!(store.projection_page("entities", 0, 10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn leftover_projection_is_rebuilt() {
        let store = seeded_store();
        // Simulate an interrupted run
        store.project_nodes("entities", CATEGORY_LABEL).unwrap();

        let projector = CandidateProjector::new(store.clone(), "entities", CATEGORY_LABEL);
        let guard = projector.project().await.unwrap();
        assert_eq!(guard.name(), "entities");
        assert_eq!(guard.node_count(), 2);
    }

    #[tokio::test]
    async fn guard_drops_projection() {
        let store = seeded_store();
        let projector = CandidateProjector::new(store.clone(), "entities", CATEGORY_LABEL);
        {
            let _guard = projector.project().await.unwrap();
        }
        assert!(!store.drop_projection("entities").unwrap(), "already dropped by guard");

        let guard = projector.project().await.unwrap();
        assert!(guard.release().unwrap());
        assert!(store.projection_page("entities", 0, 1).is_err());
    }
}
