//! MergeExecutor: turn adjudicated proposals into node merges
//!
//! Proposal names are resolved back to node ids through an index built once
//! per run. Groups that resolve to fewer than two ids are skipped. The rest
//! are merged in fixed-size batches, one store transaction per batch; a
//! failing batch is logged and the next one still runs.

use crate::graph::NodeId;
use crate::resolver::MergeProposal;
use crate::storage::{with_retry, GraphStore, MergePolicy, NodeSummary, RetryPolicy};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Normalize a name for matching proposals to nodes.
///
/// Trims, lowercases, and treats `_` and `-` as spaces.
pub fn normalize_for_merge(name: &str) -> String {
    name.trim().to_lowercase().replace('_', " ").replace('-', " ")
}

/// Normalized name → every node id carrying it.
#[derive(Debug, Default)]
pub struct NameIndex {
    ids: HashMap<String, Vec<NodeId>>,
}

impl NameIndex {
    pub fn build(nodes: &[NodeSummary]) -> Self {
        let mut ids: HashMap<String, Vec<NodeId>> = HashMap::new();
        for node in nodes {
            let key = normalize_for_merge(&node.name);
            if key.is_empty() {
                continue;
            }
            ids.entry(key).or_default().push(node.id.clone());
        }
        Self { ids }
    }

    pub fn lookup(&self, name: &str) -> &[NodeId] {
        self.ids
            .get(&normalize_for_merge(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Counts from one merge stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Groups actually collapsed into a survivor
    pub merged: usize,
    /// Proposal groups that resolved to fewer than two ids
    pub groups_skipped: usize,
    pub batches_failed: usize,
}

pub struct MergeExecutor {
    store: Arc<dyn GraphStore>,
    batch_size: usize,
    policy: MergePolicy,
    retry: RetryPolicy,
}

impl MergeExecutor {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            batch_size: 20,
            policy: MergePolicy::Discard,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Resolve proposals to distinct id sets of two or more nodes.
    ///
    /// Returns the groups (deduplicated by id set, in proposal order) and
    /// the number of proposal groups skipped.
    pub fn resolve_groups(
        &self,
        index: &NameIndex,
        proposals: &[MergeProposal],
    ) -> (Vec<Vec<NodeId>>, usize) {
        let mut seen: BTreeSet<Vec<NodeId>> = BTreeSet::new();
        let mut groups = Vec::new();
        let mut skipped = 0;

        for proposal in proposals {
            for (merged_name, originals) in proposal {
                let mut ids: BTreeSet<NodeId> = BTreeSet::new();
                for original in originals {
                    let found = index.lookup(original);
                    if found.is_empty() {
                        warn!(name = %original, merged = %merged_name, "no node found for name");
                    }
                    ids.extend(found.iter().cloned());
                }

                if ids.len() < 2 {
                    debug!(merged = %merged_name, "no merge needed");
                    skipped += 1;
                    continue;
                }
                let ids: Vec<NodeId> = ids.into_iter().collect();
                if seen.insert(ids.clone()) {
                    groups.push(ids);
                }
            }
        }
        (groups, skipped)
    }

    /// Merge every resolvable group, batch by batch.
    pub async fn execute(&self, index: &NameIndex, proposals: &[MergeProposal]) -> MergeReport {
        let (groups, groups_skipped) = self.resolve_groups(index, proposals);
        let mut report = MergeReport {
            groups_skipped,
            ..MergeReport::default()
        };

        for (batch_idx, batch) in groups.chunks(self.batch_size).enumerate() {
            let store = &self.store;
            let policy = self.policy;
            match with_retry(self.retry, "merge_batch", || store.merge_batch(batch, policy)).await {
                Ok(merged) => {
                    report.merged += merged;
                    debug!(batch = batch_idx, groups = batch.len(), merged, "merged batch");
                }
                Err(e) => {
                    error!(batch = batch_idx, groups = ?batch, error = %e, "merge batch failed");
                    report.batches_failed += 1;
                }
            }
        }

        info!(
            merged = report.merged,
            skipped = report.groups_skipped,
            failed_batches = report.batches_failed,
            "merge stage finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CategoryNode, EdgeId, Relationship, CATEGORY_LABEL};
    use crate::storage::{
        busy_error, OpenStore, ProjectedNode, Projection, RelationshipPredicate, SqliteStore,
        StorageError, StorageResult,
    };
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Delegates to SQLite, failing `merge_batch` with queued errors first.
    struct FlakyStore {
        inner: SqliteStore,
        failures: Mutex<VecDeque<StorageError>>,
        merge_calls: Mutex<usize>,
    }

    impl FlakyStore {
        fn new(inner: SqliteStore, failures: Vec<StorageError>) -> Self {
            Self {
                inner,
                failures: Mutex::new(failures.into()),
                merge_calls: Mutex::new(0),
            }
        }

        fn merge_calls(&self) -> usize {
            *self.merge_calls.lock().unwrap()
        }
    }

    impl GraphStore for FlakyStore {
        fn save_node(&self, node: &CategoryNode) -> StorageResult<()> {
            self.inner.save_node(node)
        }
        fn save_labeled_node(&self, label: &str, node: &CategoryNode) -> StorageResult<()> {
            self.inner.save_labeled_node(label, node)
        }
        fn load_node(&self, id: &NodeId) -> StorageResult<Option<CategoryNode>> {
            self.inner.load_node(id)
        }
        fn node_summaries(&self, label: &str) -> StorageResult<Vec<NodeSummary>> {
            self.inner.node_summaries(label)
        }
        fn count_nodes(&self, label: &str) -> StorageResult<usize> {
            self.inner.count_nodes(label)
        }
        fn save_relationship(&self, relationship: &Relationship) -> StorageResult<EdgeId> {
            self.inner.save_relationship(relationship)
        }
        fn relationships(&self, rel_type: Option<&str>) -> StorageResult<Vec<Relationship>> {
            self.inner.relationships(rel_type)
        }
        fn count_relationships(&self) -> StorageResult<usize> {
            self.inner.count_relationships()
        }
        fn project_nodes(&self, name: &str, label: &str) -> StorageResult<Projection> {
            self.inner.project_nodes(name, label)
        }
        fn drop_projection(&self, name: &str) -> StorageResult<bool> {
            self.inner.drop_projection(name)
        }
        fn projection_page(
            &self,
            name: &str,
            offset: usize,
            limit: usize,
        ) -> StorageResult<Vec<ProjectedNode>> {
            self.inner.projection_page(name, offset, limit)
        }
        fn write_communities(
            &self,
            label: &str,
            assignments: &[(NodeId, i64)],
        ) -> StorageResult<usize> {
            self.inner.write_communities(label, assignments)
        }
        fn merge_nodes(
            &self,
            ids: &[NodeId],
            policy: MergePolicy,
        ) -> StorageResult<Option<NodeId>> {
            self.inner.merge_nodes(ids, policy)
        }
        fn merge_batch(&self, groups: &[Vec<NodeId>], policy: MergePolicy) -> StorageResult<usize> {
            *self.merge_calls.lock().unwrap() += 1;
            if let Some(e) = self.failures.lock().unwrap().pop_front() {
                return Err(e);
            }
            self.inner.merge_batch(groups, policy)
        }
        fn delete_relationships_matching(
            &self,
            predicate: &RelationshipPredicate,
            batch_size: usize,
        ) -> StorageResult<usize> {
            self.inner.delete_relationships_matching(predicate, batch_size)
        }
    }

    fn flaky(names: &[(&str, &str)], failures: Vec<StorageError>) -> Arc<FlakyStore> {
        let store = FlakyStore::new(SqliteStore::open_in_memory().unwrap(), failures);
        for (id, name) in names {
            store
                .save_node(&CategoryNode::new(*name).with_id(*id).with_embedding(vec![1.0]))
                .unwrap();
        }
        Arc::new(store)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            initial_backoff: Duration::from_millis(1),
        }
    }

    fn group(merged: &str, originals: &[&str]) -> (String, Vec<String>) {
        (
            merged.to_string(),
            originals.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn proposal(groups: Vec<(String, Vec<String>)>) -> MergeProposal {
        groups.into_iter().collect()
    }

    fn seeded(names: &[(&str, &str)]) -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        for (id, name) in names {
            store
                .save_node(&CategoryNode::new(*name).with_id(*id).with_embedding(vec![1.0]))
                .unwrap();
        }
        Arc::new(store)
    }

    fn index_of(store: &SqliteStore) -> NameIndex {
        NameIndex::build(&store.node_summaries(CATEGORY_LABEL).unwrap())
    }

    #[test]
    fn normalization_folds_case_and_separators() {
        assert_eq!(normalize_for_merge("  Machine_Learning "), "machine learning");
        assert_eq!(normalize_for_merge("machine-learning"), "machine learning");
    }

    #[test]
    fn names_resolve_to_every_matching_id() {
        let store = seeded(&[("a", "AI"), ("b", "ai"), ("c", "A-I"), ("d", "robotics")]);
        let index = index_of(&store);
        assert_eq!(index.lookup("ai").len(), 2);
        assert_eq!(index.lookup("a i").len(), 1);
        assert!(index.lookup("unknown").is_empty());
    }

    #[test]
    fn groups_below_two_ids_are_skipped_and_duplicates_collapsed() {
        let store = seeded(&[("a", "AI"), ("b", "artificial intelligence"), ("c", "robotics")]);
        let executor = MergeExecutor::new(store.clone());
        let proposals = vec![
            proposal(vec![
                group("artificial intelligence", &["ai", "artificial intelligence"]),
                group("robotics", &["robotics"]),
                group("ghost", &["never seen"]),
            ]),
            proposal(vec![group("AI", &["artificial intelligence", "ai"])]),
        ];

        let (groups, skipped) = executor.resolve_groups(&index_of(&store), &proposals);
        assert_eq!(groups, vec![vec![NodeId::from("a"), NodeId::from("b")]]);
        assert_eq!(skipped, 2);
    }

    #[tokio::test]
    async fn execute_merges_in_batches() {
        let store = seeded(&[
            ("a1", "ai"),
            ("a2", "AI"),
            ("m1", "ml"),
            ("m2", "ML"),
            ("r1", "robotics"),
            ("r2", "Robotics"),
        ]);
        let index = index_of(&store);
        let proposals = vec![proposal(vec![
            group("ai", &["ai"]),
            group("ml", &["ml"]),
            group("robotics", &["robotics"]),
        ])];

        let report = MergeExecutor::new(store.clone())
            .with_batch_size(2)
            .execute(&index, &proposals)
            .await;
        assert_eq!(report.merged, 3);
        assert_eq!(report.batches_failed, 0);
        assert_eq!(store.count_nodes(CATEGORY_LABEL).unwrap(), 3);
    }

    #[tokio::test]
    async fn rerunning_a_merge_is_a_noop() {
        let store = seeded(&[("a", "ai"), ("b", "AI")]);
        let proposals = vec![proposal(vec![group("ai", &["ai"])])];
        let executor = MergeExecutor::new(store.clone());

        let first = executor.execute(&index_of(&store), &proposals).await;
        assert_eq!(first.merged, 1);

        // Stale index: ids were resolved before the first merge
        let stale = NameIndex::build(&[
            NodeSummary { id: NodeId::from("a"), name: "ai".into(), community: None },
            NodeSummary { id: NodeId::from("b"), name: "AI".into(), community: None },
        ]);
        let second = executor.execute(&stale, &proposals).await;
        assert_eq!(second.merged, 0);
        assert_eq!(second.batches_failed, 0);

        let fresh = executor.execute(&index_of(&store), &proposals).await;
        assert_eq!(fresh.merged, 0);
        assert_eq!(fresh.groups_skipped, 1);
    }

    #[tokio::test]
    async fn failed_batch_does_not_stop_later_batches() {
        let store = flaky(
            &[("a1", "ai"), ("a2", "AI"), ("m1", "ml"), ("m2", "ML")],
            vec![StorageError::InvalidData("constraint violated".into())],
        );
        let index = NameIndex::build(&store.node_summaries(CATEGORY_LABEL).unwrap());
        let proposals = vec![proposal(vec![group("ai", &["ai"]), group("ml", &["ml"])])];

        let report = MergeExecutor::new(store.clone())
            .with_batch_size(1)
            .with_retry_policy(fast_retry())
            .execute(&index, &proposals)
            .await;

        assert_eq!(report.batches_failed, 1);
        assert_eq!(report.merged, 1);
        // Data errors are not retried: one call per batch
        assert_eq!(store.merge_calls(), 2);
        // "ai" sorts first, so its batch was the one that failed
        assert!(store.load_node(&NodeId::from("a1")).unwrap().is_some());
        assert!(store.load_node(&NodeId::from("a2")).unwrap().is_some());
        assert_eq!(store.count_nodes(CATEGORY_LABEL).unwrap(), 3);
    }

    #[tokio::test]
    async fn busy_batch_is_retried() {
        let store = flaky(&[("a1", "ai"), ("a2", "AI")], vec![busy_error(), busy_error()]);
        let index = NameIndex::build(&store.node_summaries(CATEGORY_LABEL).unwrap());
        let proposals = vec![proposal(vec![group("ai", &["ai"])])];

        let report = MergeExecutor::new(store.clone())
            .with_retry_policy(fast_retry())
            .execute(&index, &proposals)
            .await;

        assert_eq!(report.batches_failed, 0);
        assert_eq!(report.merged, 1);
        assert_eq!(store.merge_calls(), 3);
        assert_eq!(store.count_nodes(CATEGORY_LABEL).unwrap(), 1);
    }
}
