//! Graph fixtures

use coalesce::{
    CategoryNode, GraphStore, NodeId, OpenStore, Relationship, SqliteStore, CATEGORY_LABEL,
};
use std::collections::HashSet;
use std::sync::Arc;

pub fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().expect("in-memory store"))
}

/// Save a category with a fixed id and embedding.
pub fn category(store: &dyn GraphStore, id: &str, name: &str, embedding: &[f32]) -> CategoryNode {
    let node = CategoryNode::new(name)
        .with_id(id)
        .with_embedding(embedding.to_vec());
    store.save_node(&node).expect("save category");
    node
}

/// Save a `Document` node that upstream extraction would have written.
pub fn document(store: &dyn GraphStore, id: &str) {
    let node = CategoryNode::new(format!("{}.md", id)).with_id(id);
    store
        .save_labeled_node("Document", &node)
        .expect("save document");
}

pub fn mention(store: &dyn GraphStore, source: &str, target: &str) {
    store
        .save_relationship(&Relationship::mentions(
            NodeId::from(source),
            NodeId::from(target),
        ))
        .expect("save relationship");
}

/// Sorted names of every category in the store.
pub fn names_of(store: &dyn GraphStore) -> Vec<String> {
    let mut names: Vec<String> = store
        .node_summaries(CATEGORY_LABEL)
        .expect("node summaries")
        .into_iter()
        .map(|n| n.name)
        .collect();
    names.sort();
    names
}

/// No self-loops, at most one relationship per ordered pair and type, and
/// at most one direction per unordered pair and type.
pub fn assert_sanitized(store: &dyn GraphStore) {
    let mut ordered = HashSet::new();
    let mut unordered = HashSet::new();
    for rel in store.relationships(None).expect("relationships") {
        assert!(!rel.is_self_loop(), "self-loop left on {}", rel.source);
        assert!(
            ordered.insert((rel.source.clone(), rel.target.clone(), rel.rel_type.clone())),
            "parallel duplicate {} -> {}",
            rel.source,
            rel.target
        );
        let (a, b) = if rel.source < rel.target {
            (rel.source.clone(), rel.target.clone())
        } else {
            (rel.target.clone(), rel.source.clone())
        };
        assert!(
            unordered.insert((a, b, rel.rel_type.clone())),
            "reciprocal duplicate {} <-> {}",
            rel.source,
            rel.target
        );
    }
}
